use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tuner::analyzer;
use tuner::client::RemoteClient;
use tuner::console::Console;
use tuner::controller::{ModeController, PlayerRole, RemoteRole};
use tuner::core::{PlayerCore, PlayerHandle};
use tuner::engine::MpvEngine;
use tuner::resolver::StreamResolver;
use tuner_proto::config::Config;
use tuner_proto::platform;
use tuner_proto::protocol::Command;
use tuner_proto::settings::{OperatingMode, SettingsStore};
use tuner_proto::stations::{self, Station};

#[derive(Parser)]
#[command(name = "tuner", version, about = "Internet radio player with a LAN remote control")]
struct Cli {
    /// Config file (default: ~/.config/tuner/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start in the persisted mode with an interactive console (default)
    Run,
    /// Play and accept remote commands until Ctrl-C
    Player,
    /// Send one command to a player
    Remote {
        /// Player address, `host` or `host:port` (default: persisted address)
        #[arg(long)]
        address: Option<String>,
        #[command(subcommand)]
        action: RemoteAction,
    },
    /// Show or set the persisted operating mode
    Mode { mode: Option<ModeArg> },
    /// Persist the player address used in Remote mode and test it
    Peer { address: String },
    /// Resolve a station URL to the stream mpv would play
    Resolve { url: String },
    /// Print a stream's status, headers and detected audio format
    Analyze { url: String },
    /// Print the LAN address other devices should use for this player
    Ip,
    /// List the configured stations
    Stations,
}

#[derive(Subcommand)]
enum RemoteAction {
    Ping,
    State,
    Mute,
    Unmute,
    Select { index: i32 },
    TestUrl { url: String },
    /// Poll the player's state and print every change
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Player,
    Remote,
}

impl From<ModeArg> for OperatingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Player => OperatingMode::Player,
            ModeArg::Remote => OperatingMode::Remote,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;

    let log_path = tuner::logging::init(&config.paths.log_dir)?;
    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", config_path);

    let settings = Arc::new(SettingsStore::open(config.paths.settings_file.clone()));

    match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Run => run_console(&config, settings).await,
        Cmd::Player => run_player(&config, settings).await,
        Cmd::Remote { address, action } => {
            let address = match address {
                Some(a) => a,
                None => settings.player_address().await,
            };
            if address.is_empty() {
                anyhow::bail!("no player address; pass --address or run `tuner peer <address>`");
            }
            run_remote(&config, &address, action).await
        }
        Cmd::Mode { mode } => {
            if let Some(mode) = mode {
                settings.set_operating_mode(mode.into()).await?;
            }
            println!("{}", settings.operating_mode().await);
            Ok(())
        }
        Cmd::Peer { address } => {
            settings.set_player_address(&address).await?;
            let reachable = RemoteClient::from_config(&config.remote)
                .test_connection(&address)
                .await;
            println!("{}: {}", address, if reachable { "OK" } else { "Error" });
            Ok(())
        }
        Cmd::Analyze { url } => {
            let resolver = StreamResolver::new(&config.resolver)?;
            let report = analyzer::analyze(&resolver, &url).await?;
            println!("{}", report);
            if !report.is_success() {
                anyhow::bail!("{} answered {}", url, report.status);
            }
            Ok(())
        }
        Cmd::Resolve { url } => {
            let resolver = StreamResolver::new(&config.resolver)?;
            let resolution = resolver.resolve_detailed(&url).await;
            println!("{}", resolution.url);
            if !resolution.is_resolved() {
                eprintln!(
                    "stopped after {} steps: {:?}",
                    resolution.steps, resolution.reason
                );
            }
            Ok(())
        }
        Cmd::Ip => {
            match platform::local_lan_address() {
                Some(ip) => println!("{}:{}", ip, config.player.port),
                None => println!("IP not found"),
            }
            Ok(())
        }
        Cmd::Stations => {
            for (i, station) in stations::load_stations(&config.stations).iter().enumerate() {
                println!("{:>3}  {}  {}", i, station.name, station.url);
            }
            Ok(())
        }
    }
}

/// Build the player core and run it on its own task.  `autoplay` starts the
/// current station right away.
async fn spawn_player(
    config: &Config,
    settings: Arc<SettingsStore>,
    autoplay: bool,
    cancel: CancellationToken,
) -> anyhow::Result<(PlayerHandle, Vec<Station>, tokio::task::JoinHandle<()>)> {
    let station_list = stations::load_stations(&config.stations);
    let resolver = StreamResolver::new(&config.resolver).context("building HTTP client")?;
    let engine = MpvEngine::new(config.player.load_timeout())
        .context("mpv is required for playback; install it or set MPV_PATH")?;

    let (core, handle) =
        PlayerCore::new(station_list.clone(), Box::new(engine), resolver, settings).await;
    let core = core.with_autoplay(autoplay);
    let task = tokio::spawn(async move {
        if let Err(e) = core.run(cancel).await {
            tracing::error!("Player core exited: {:#}", e);
        }
    });
    Ok((handle, station_list, task))
}

fn mode_controller(
    config: &Config,
    settings: Arc<SettingsStore>,
    player: PlayerHandle,
    idle: watch::Receiver<bool>,
) -> ModeController {
    ModeController::new(
        settings,
        PlayerRole {
            bind_address: config.player.bind_address.clone(),
            port: config.player.port,
            player,
        },
        RemoteRole {
            client: RemoteClient::from_config(&config.remote),
            poll_interval: config.remote.poll_interval(),
            idle,
        },
    )
}

fn announce_lan_address(port: u16) {
    match platform::local_lan_address() {
        Some(ip) => println!("This device: {}:{}", ip, port),
        None => println!("This device: IP not found"),
    }
}

async fn run_console(config: &Config, settings: Arc<SettingsStore>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    // A device that comes up as a remote control stays silent.
    let autoplay = settings.operating_mode().await == OperatingMode::Player;
    let (player, station_list, core_task) =
        spawn_player(config, settings.clone(), autoplay, cancel.clone()).await?;

    let (idle_tx, idle_rx) = watch::channel(false);
    let mut controller = mode_controller(config, settings, player, idle_rx);
    controller.start().await?;
    announce_lan_address(config.player.port);

    Console::new(controller, idle_tx, station_list).run().await?;

    cancel.cancel();
    let _ = core_task.await;
    Ok(())
}

async fn run_player(config: &Config, settings: Arc<SettingsStore>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (player, _, core_task) = spawn_player(config, settings.clone(), true, cancel.clone()).await?;

    let (_idle_tx, idle_rx) = watch::channel(false);
    let mut controller = mode_controller(config, settings, player, idle_rx);
    controller.switch(OperatingMode::Player).await?;
    if !controller.is_listening() {
        anyhow::bail!("could not listen on port {}", config.player.port);
    }
    announce_lan_address(config.player.port);

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    controller.stop().await;
    cancel.cancel();
    let _ = core_task.await;
    Ok(())
}

async fn run_remote(config: &Config, address: &str, action: RemoteAction) -> anyhow::Result<()> {
    let client = RemoteClient::from_config(&config.remote);

    let command = match action {
        RemoteAction::Ping => {
            let reachable = client.test_connection(address).await;
            println!("{}", if reachable { "OK" } else { "Error" });
            return Ok(());
        }
        RemoteAction::Watch => return watch_player(client, address, config).await,
        RemoteAction::State => Command::GetState,
        RemoteAction::Mute => Command::Mute,
        RemoteAction::Unmute => Command::Unmute,
        RemoteAction::Select { index } => Command::SelectStation { index },
        RemoteAction::TestUrl { url } => Command::TestUrl { url },
    };

    println!("{}", client.send_command(address, &command).await);
    Ok(())
}

async fn watch_player(client: RemoteClient, address: &str, config: &Config) -> anyhow::Result<()> {
    let (_idle_tx, idle_rx) = watch::channel(false);
    let poller = tuner::poller::spawn(
        client,
        address.to_string(),
        config.remote.poll_interval(),
        idle_rx,
    );
    let mut view = poller.view();
    let mut last_state = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                if let Some(error) = &current.last_error {
                    println!("ERROR:{}", error);
                } else if current.state != last_state {
                    if let Some(state) = &current.state {
                        println!("{}", state);
                    }
                    last_state = current.state;
                }
            }
        }
    }

    poller.stop().await;
    Ok(())
}
