use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tuner_proto::settings::{OperatingMode, SettingsStore};

use crate::client::RemoteClient;
use crate::core::{PlayerHandle, PlayerIntent};
use crate::listener::Listener;
use crate::poller::{self, PollerHandle, RemoteView};

/// Everything needed to bring up the Player role.
pub struct PlayerRole {
    pub bind_address: String,
    pub port: u16,
    pub player: PlayerHandle,
}

/// Everything needed to bring up the Remote role.
pub struct RemoteRole {
    pub client: RemoteClient,
    pub poll_interval: Duration,
    pub idle: watch::Receiver<bool>,
}

enum ActiveRole {
    Player(Listener),
    Remote(PollerHandle),
    /// Remote mode without a peer address yet.
    Unconfigured,
}

/// Keeps exactly one role's network endpoint alive.
pub struct ModeController {
    settings: Arc<SettingsStore>,
    player: PlayerRole,
    remote: RemoteRole,
    mode: OperatingMode,
    active: Option<ActiveRole>,
}

impl ModeController {
    pub fn new(settings: Arc<SettingsStore>, player: PlayerRole, remote: RemoteRole) -> Self {
        Self {
            settings,
            player,
            remote,
            mode: OperatingMode::Player,
            active: None,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Start in whatever mode was persisted last.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let mode = self.settings.operating_mode().await;
        self.switch(mode).await
    }

    /// Stop the current role, persist `mode`, start the new role.
    ///
    /// A remote control is silent: entering Remote stops local playback,
    /// and coming back from Remote resumes the current station.
    pub async fn switch(&mut self, mode: OperatingMode) -> anyhow::Result<()> {
        let previous = self.active.as_ref().map(|_| self.mode);
        self.stop().await;
        self.settings.set_operating_mode(mode).await?;
        self.mode = mode;

        let local = match (previous, mode) {
            (_, OperatingMode::Remote) => Some(PlayerIntent::Stop),
            (Some(OperatingMode::Remote), OperatingMode::Player) => Some(PlayerIntent::Resume),
            _ => None,
        };
        if let Some(intent) = local {
            if let Err(e) = self.player.player.submit(intent).await {
                warn!("Local playback not adjusted: {}", e);
            }
        }

        let role = match mode {
            OperatingMode::Player => {
                let mut listener = Listener::new(
                    self.player.bind_address.clone(),
                    self.player.port,
                    self.player.player.clone(),
                );
                // Bind errors are already logged; the device stays Stopped.
                let _ = listener.start().await;
                ActiveRole::Player(listener)
            }
            OperatingMode::Remote => {
                let address = self.settings.player_address().await;
                if address.is_empty() {
                    warn!("Remote mode without a player address");
                    ActiveRole::Unconfigured
                } else {
                    info!("Mirroring player at {}", address);
                    ActiveRole::Remote(poller::spawn(
                        self.remote.client.clone(),
                        address,
                        self.remote.poll_interval,
                        self.remote.idle.clone(),
                    ))
                }
            }
        };
        self.active = Some(role);
        Ok(())
    }

    /// Point the Remote role at a new player; restarts polling when active.
    pub async fn set_player_address(&mut self, address: &str) -> anyhow::Result<()> {
        self.settings.set_player_address(address).await?;
        if self.mode == OperatingMode::Remote && self.active.is_some() {
            self.switch(OperatingMode::Remote).await?;
        }
        Ok(())
    }

    pub async fn stop(&mut self) {
        match self.active.take() {
            Some(ActiveRole::Player(mut listener)) => listener.stop().await,
            Some(ActiveRole::Remote(poller)) => poller.stop().await,
            Some(ActiveRole::Unconfigured) | None => {}
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(&self.active, Some(ActiveRole::Player(l)) if l.is_listening())
    }

    pub fn listener_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.active {
            Some(ActiveRole::Player(l)) => l.local_addr(),
            _ => None,
        }
    }

    pub fn remote_view(&self) -> Option<watch::Receiver<RemoteView>> {
        match &self.active {
            Some(ActiveRole::Remote(p)) => Some(p.view()),
            _ => None,
        }
    }

    pub async fn player_address(&self) -> String {
        self.settings.player_address().await
    }

    pub fn remote_client(&self) -> &RemoteClient {
        &self.remote.client
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player.player
    }
}
