//! PlayerCore: single-owner loop for all playback state.
//!
//! The station list, the current index, the mute flag and the playback
//! engine belong to this loop and nothing else.  Network tasks hold a
//! `PlayerHandle`: they queue a `PlayerIntent` and wait until the core has
//! applied it.  The core drains its queue once per tick, in arrival order.
//!
//! Stream resolution runs in spawned tasks so a slow directory never stalls
//! the tick.  Results come back tagged with the generation that requested
//! them; anything older than the current generation is dropped, so at most
//! one stream is ever started per selection.
//!
//! After every change the core publishes a `StateSnapshot` on a watch
//! channel.  That snapshot is the only source `GET_STATE` reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tuner_proto::protocol::StateSnapshot;
use tuner_proto::settings::SettingsStore;
use tuner_proto::stations::{self, Station};

use crate::engine::{LoadState, PlaybackEngine};
use crate::resolver::{Resolution, StreamResolver};

pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

const INTENT_QUEUE_DEPTH: usize = 64;

// ── intents ───────────────────────────────────────────────────────────────────

/// Everything other tasks may ask of the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerIntent {
    /// Out-of-range indices are ignored with a warning.
    SelectStation(i32),
    Mute,
    Unmute,
    TestUrl(String),
    /// Silence local playback without touching the mute flag.
    Stop,
    /// Start the current station again if nothing is playing or muted.
    Resume,
}

#[derive(Debug)]
pub struct QueuedIntent {
    pub intent: PlayerIntent,
    /// Fired once the core has applied the intent.
    pub done: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Player not running")]
pub struct PlayerGone;

/// Cloneable access to a running core: queue intents, read snapshots.
#[derive(Clone)]
pub struct PlayerHandle {
    intent_tx: mpsc::Sender<QueuedIntent>,
    state_rx: Option<watch::Receiver<StateSnapshot>>,
}

impl PlayerHandle {
    /// `state_rx = None` leaves `GET_STATE` without a handler.
    pub fn new(
        intent_tx: mpsc::Sender<QueuedIntent>,
        state_rx: Option<watch::Receiver<StateSnapshot>>,
    ) -> Self {
        Self {
            intent_tx,
            state_rx,
        }
    }

    /// Queue `intent` and wait until the core has applied it.
    pub async fn submit(&self, intent: PlayerIntent) -> Result<(), PlayerGone> {
        let (done, applied) = oneshot::channel();
        self.intent_tx
            .send(QueuedIntent { intent, done })
            .await
            .map_err(|_| PlayerGone)?;
        applied.await.map_err(|_| PlayerGone)
    }

    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.state_rx.as_ref().map(|rx| *rx.borrow())
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<StateSnapshot>> {
        self.state_rx.clone()
    }
}

// ── observer ──────────────────────────────────────────────────────────────────

/// Notifications for whoever renders the player (replaces event fan-out).
/// Called on the core's task, in the order the changes happen.
pub trait PlayerObserver: Send {
    fn on_mute_changed(&mut self, _muted: bool) {}
    fn on_station_changed(&mut self, _index: usize, _station: &Station) {}
    fn on_load_state(&mut self, _state: LoadState) {}
}

pub struct LogObserver;

impl PlayerObserver for LogObserver {
    fn on_mute_changed(&mut self, muted: bool) {
        info!("{}", if muted { "Muted" } else { "Unmuted" });
    }

    fn on_station_changed(&mut self, index: usize, station: &Station) {
        info!("Now on station {}: {}", index, station.name);
    }

    fn on_load_state(&mut self, state: LoadState) {
        info!("Stream state: {:?}", state);
    }
}

// ── session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSession {
    /// What was asked for (station URL or test URL).
    pub seed_url: String,
    /// Resolved URL handed to the engine; `None` while resolving.
    pub url: Option<String>,
    pub load_state: LoadState,
}

struct Resolved {
    generation: u64,
    resolution: Resolution,
}

// ── core ──────────────────────────────────────────────────────────────────────

pub struct PlayerCore {
    stations: Vec<Station>,
    current: usize,
    muted: bool,
    session: StreamSession,
    engine: Box<dyn PlaybackEngine>,
    resolver: StreamResolver,
    settings: Arc<SettingsStore>,
    observer: Box<dyn PlayerObserver>,
    state_tx: watch::Sender<StateSnapshot>,
    intent_rx: mpsc::Receiver<QueuedIntent>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
    resolved_rx: Option<mpsc::UnboundedReceiver<Resolved>>,
    /// Bumped whenever a new stream is requested or playback is muted.
    generation: u64,
    tick: Duration,
    autoplay: bool,
}

impl PlayerCore {
    /// Build the core and its handle.  The persisted station name picks the
    /// starting index; unknown names fall back to the first station.
    pub async fn new(
        stations: Vec<Station>,
        engine: Box<dyn PlaybackEngine>,
        resolver: StreamResolver,
        settings: Arc<SettingsStore>,
    ) -> (Self, PlayerHandle) {
        let saved = settings.current_station_name().await;
        let current = match stations::index_of(&stations, &saved) {
            Some(i) => i,
            None => {
                if !saved.is_empty() {
                    warn!("Saved station {:?} not in station list", saved);
                }
                0
            }
        };

        let snapshot = StateSnapshot {
            station_index: current,
            muted: false,
        };
        let (state_tx, state_rx) = watch::channel(snapshot);
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_QUEUE_DEPTH);
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();

        let core = Self {
            stations,
            current,
            muted: false,
            session: StreamSession::default(),
            engine,
            resolver,
            settings,
            observer: Box::new(LogObserver),
            state_tx,
            intent_rx,
            resolved_tx,
            resolved_rx: Some(resolved_rx),
            generation: 0,
            tick: TICK_INTERVAL,
            autoplay: true,
        };
        (core, PlayerHandle::new(intent_tx, Some(state_rx)))
    }

    pub fn with_observer(mut self, observer: Box<dyn PlayerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Whether the current station starts playing when `run` begins.
    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Run until `cancel` fires.  The engine is stopped on the way out.
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut resolved_rx = self
            .resolved_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("player core already ran"))?;

        info!("PlayerCore: starting with {} stations", self.stations.len());
        if self.autoplay && !self.stations.is_empty() {
            self.start_current_station().await;
        }

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.drain_intents().await;
                    self.poll_engine();
                }
                Some(resolved) = resolved_rx.recv() => {
                    self.on_resolved(resolved);
                }
            }
        }

        self.engine.stop();
        Ok(())
    }

    async fn drain_intents(&mut self) {
        while let Ok(queued) = self.intent_rx.try_recv() {
            debug!("PlayerCore: applying {:?}", queued.intent);
            self.apply(queued.intent).await;
            let _ = queued.done.send(());
        }
    }

    async fn apply(&mut self, intent: PlayerIntent) {
        match intent {
            PlayerIntent::SelectStation(index) => {
                let valid = usize::try_from(index)
                    .ok()
                    .filter(|&i| i < self.stations.len());
                match valid {
                    Some(i) => self.select(i).await,
                    None => warn!(
                        "Ignoring station index {} ({} stations)",
                        index,
                        self.stations.len()
                    ),
                }
            }
            PlayerIntent::Mute => self.mute(),
            PlayerIntent::Unmute => self.unmute(),
            PlayerIntent::TestUrl(url) => self.test_url(url).await,
            PlayerIntent::Stop => self.stop(),
            PlayerIntent::Resume => self.resume(),
        }
    }

    async fn select(&mut self, index: usize) {
        self.current = index;
        self.set_muted_flag(false);

        let station = self.stations[index].clone();
        self.start_stream(station.url.clone());
        if let Err(e) = self.settings.set_current_station_name(&station.name).await {
            error!("Failed to persist current station: {}", e);
        }
        self.observer.on_station_changed(index, &station);
        self.publish();
    }

    async fn start_current_station(&mut self) {
        self.select(self.current).await;
    }

    fn mute(&mut self) {
        if !self.muted {
            // Pending resolutions must not restart audio behind the mute.
            self.generation += 1;
            self.engine.set_muted(true);
            self.session.load_state = LoadState::Idle;
            self.session.url = None;
            self.set_muted_flag(true);
        }
        self.publish();
    }

    fn unmute(&mut self) {
        if self.muted {
            self.set_muted_flag(false);
            let seed = if self.session.seed_url.is_empty() {
                self.stations.get(self.current).map(|s| s.url.clone())
            } else {
                Some(self.session.seed_url.clone())
            };
            if let Some(seed) = seed {
                self.start_stream(seed);
            }
        }
        self.publish();
    }

    fn stop(&mut self) {
        if self.session.seed_url.is_empty() {
            return;
        }
        info!("Stopping local playback");
        self.generation += 1;
        self.engine.stop();
        self.set_load_state(LoadState::Idle);
        self.session = StreamSession::default();
    }

    fn resume(&mut self) {
        if self.muted || !self.session.seed_url.is_empty() {
            return;
        }
        if let Some(station) = self.stations.get(self.current) {
            info!("Resuming {}", station.name);
            self.start_stream(station.url.clone());
        }
    }

    async fn test_url(&mut self, url: String) {
        info!("Testing URL: {}", url);
        if let Err(e) = self.settings.set_test_url(&url).await {
            error!("Failed to persist test URL: {}", e);
        }
        self.set_muted_flag(false);
        self.start_stream(url);
        self.publish();
    }

    fn set_muted_flag(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            if !muted {
                self.engine.set_muted(false);
            }
            self.observer.on_mute_changed(muted);
        }
    }

    /// Stop whatever plays and resolve `seed` in the background.
    fn start_stream(&mut self, seed: String) {
        self.engine.stop();
        self.generation += 1;
        self.session = StreamSession {
            seed_url: seed.clone(),
            url: None,
            load_state: LoadState::Loading,
        };

        let generation = self.generation;
        let resolver = self.resolver.clone();
        let tx = self.resolved_tx.clone();
        tokio::spawn(async move {
            let resolution = resolver.resolve_detailed(&seed).await;
            let _ = tx.send(Resolved {
                generation,
                resolution,
            });
        });
    }

    fn on_resolved(&mut self, resolved: Resolved) {
        if resolved.generation != self.generation || self.muted {
            debug!(
                "PlayerCore: dropping stale resolution {}",
                resolved.resolution.url
            );
            return;
        }

        let resolution = resolved.resolution;
        if !resolution.is_resolved() {
            error!(
                "Failed to resolve stream URL ({:?}), trying {} anyway",
                resolution.reason, resolution.url
            );
        }

        match self.engine.play(&resolution.url) {
            Ok(()) => self.session.url = Some(resolution.url),
            Err(e) => {
                error!("Failed to start playback of {}: {}", resolution.url, e);
                self.set_load_state(LoadState::Error);
            }
        }
    }

    fn poll_engine(&mut self) {
        if self.session.url.is_none()
            || matches!(
                self.session.load_state,
                LoadState::Error | LoadState::Timeout | LoadState::Idle
            )
        {
            return;
        }
        let state = self.engine.load_state();
        if state != LoadState::Idle {
            self.set_load_state(state);
        }
    }

    fn set_load_state(&mut self, state: LoadState) {
        if self.session.load_state == state {
            return;
        }
        match state {
            LoadState::Error => error!("Stream error: {}", self.session.seed_url),
            LoadState::Timeout => error!("Stream loading timeout: {}", self.session.seed_url),
            _ => {}
        }
        self.session.load_state = state;
        self.observer.on_load_state(state);
    }

    fn publish(&self) {
        self.state_tx.send_replace(StateSnapshot {
            station_index: self.current,
            muted: self.muted,
        });
    }
}
