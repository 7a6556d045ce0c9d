mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{converse, start_listener, TestPlayer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tuner::client::{ClientError, RemoteClient};
use tuner::controller::{ModeController, PlayerRole, RemoteRole};
use tuner::poller;
use tuner_proto::protocol::{Command, ProtocolError, StateSnapshot, MAX_LINE_BYTES};
use tuner_proto::settings::{OperatingMode, SettingsStore};

fn fast_client() -> RemoteClient {
    RemoteClient::new(Duration::from_millis(500), Duration::from_millis(300))
}

/// Peer that answers every request line with `reply`, or never answers
/// when `reply` is `None`.
async fn scripted_peer(reply: Option<&'static str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(_)) = lines.next_line().await {
                    if let Some(reply) = reply {
                        let _ = write_half.write_all(format!("{}\n", reply).as_bytes()).await;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn client_drives_a_player() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;
    let address = addr.to_string();
    let client = fast_client();

    assert!(client.test_connection(&address).await);
    assert_eq!(
        client
            .send_command(&address, &Command::SelectStation { index: 2 })
            .await,
        "OK"
    );
    assert_eq!(client.send_command(&address, &Command::Mute).await, "OK");
    assert_eq!(
        client.fetch_state(&address).await.unwrap(),
        StateSnapshot {
            station_index: 2,
            muted: true
        }
    );
}

#[tokio::test]
async fn client_passes_player_errors_through() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let reply = fast_client()
        .exchange(&addr.to_string(), &Command::SelectStation { index: 1 })
        .await
        .unwrap();
    assert_eq!(reply, "OK");
    // Raw lines the client cannot produce go through `converse`.
    assert_eq!(
        converse(addr, &["SELECT_STATION|x"]).await,
        ["ERROR:Invalid station index"]
    );
}

#[tokio::test]
async fn silent_peer_times_out() {
    let addr = scripted_peer(None).await.to_string();
    let client = fast_client();

    let started = Instant::now();
    assert!(!client.test_connection(&addr).await);
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(
        client.send_command(&addr, &Command::Ping).await,
        "ERROR:Response timeout"
    );
    assert!(matches!(
        client.fetch_state(&addr).await,
        Err(ClientError::ResponseTimeout)
    ));
}

#[tokio::test]
async fn refused_connection_is_an_error_line() {
    let reply = fast_client()
        .send_command("127.0.0.1:1", &Command::GetState)
        .await;
    assert!(reply.starts_with("ERROR:"), "{}", reply);
}

#[tokio::test]
async fn wrong_ping_reply_is_not_a_connection() {
    let addr = scripted_peer(Some("PONG!")).await.to_string();
    assert!(!fast_client().test_connection(&addr).await);
}

#[tokio::test]
async fn malformed_state_is_rejected() {
    let addr = scripted_peer(Some("STATE:1")).await.to_string();
    assert!(matches!(
        fast_client().fetch_state(&addr).await,
        Err(ClientError::Protocol(_))
    ));

    let addr = scripted_peer(Some("ERROR:No state handler")).await.to_string();
    match fast_client().fetch_state(&addr).await {
        Err(ClientError::Rejected(reason)) => assert_eq!(reason, "No state handler"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn over_long_reply_is_a_protocol_error() {
    let reply: &'static str = Box::leak("X".repeat(MAX_LINE_BYTES * 2).into_boxed_str());
    let addr = scripted_peer(Some(reply)).await.to_string();
    assert!(matches!(
        fast_client().exchange(&addr, &Command::Ping).await,
        Err(ClientError::Protocol(ProtocolError::LineTooLong))
    ));
}

#[tokio::test]
async fn poller_mirrors_player_state() {
    let addr = scripted_peer(Some("STATE:4:MUTED")).await;
    let (_idle_tx, idle_rx) = watch::channel(false);

    let handle = poller::spawn(
        fast_client(),
        addr.to_string(),
        Duration::from_millis(20),
        idle_rx,
    );
    let mut view = handle.view();
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.state.is_some()))
        .await
        .unwrap()
        .unwrap();

    let current = view.borrow().clone();
    assert_eq!(
        current.state,
        Some(StateSnapshot {
            station_index: 4,
            muted: true
        })
    );
    assert!(current.last_error.is_none());
    assert!(current.last_update.is_some());
    handle.stop().await;
}

#[tokio::test]
async fn poller_skips_ticks_while_idle() {
    let addr = scripted_peer(Some("STATE:0:PLAYING")).await;
    let (idle_tx, idle_rx) = watch::channel(true);

    let handle = poller::spawn(
        fast_client(),
        addr.to_string(),
        Duration::from_millis(20),
        idle_rx,
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.view().borrow().polls, 0);

    idle_tx.send_replace(false);
    let mut view = handle.view();
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.polls > 0))
        .await
        .unwrap()
        .unwrap();
    handle.stop().await;
}

#[tokio::test]
async fn poller_keeps_last_state_across_failures() {
    let player = TestPlayer::start(2).await;
    let (mut listener, addr) = start_listener(player.handle.clone()).await;
    let (_idle_tx, idle_rx) = watch::channel(false);

    let handle = poller::spawn(
        fast_client(),
        addr.to_string(),
        Duration::from_millis(20),
        idle_rx,
    );
    let mut view = handle.view();
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.state.is_some()))
        .await
        .unwrap()
        .unwrap();

    listener.stop().await;
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.last_error.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert!(view.borrow().state.is_some());
    handle.stop().await;
}

fn controller(settings: Arc<SettingsStore>, player: &TestPlayer) -> ModeController {
    let (_idle_tx, idle_rx) = watch::channel(false);
    ModeController::new(
        settings,
        PlayerRole {
            bind_address: "127.0.0.1".into(),
            port: 0,
            player: player.handle.clone(),
        },
        RemoteRole {
            client: fast_client(),
            poll_interval: Duration::from_millis(20),
            idle: idle_rx,
        },
    )
}

#[tokio::test]
async fn controller_runs_one_role_at_a_time() {
    let player = TestPlayer::start(2).await;
    let mut controller = controller(player.settings.clone(), &player);

    controller.start().await.unwrap();
    assert_eq!(controller.mode(), OperatingMode::Player);
    assert!(controller.is_listening());
    let addr = controller.listener_addr().unwrap();
    assert_eq!(converse(addr, &["PING"]).await, ["PONG"]);

    controller.switch(OperatingMode::Remote).await.unwrap();
    assert!(!controller.is_listening());
    assert!(controller.remote_view().is_none());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    assert_eq!(player.settings.operating_mode().await, OperatingMode::Remote);

    let peer = scripted_peer(Some("STATE:1:PLAYING")).await;
    controller
        .set_player_address(&peer.to_string())
        .await
        .unwrap();
    let mut view = controller.remote_view().unwrap();
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.state.is_some()))
        .await
        .unwrap()
        .unwrap();

    controller.switch(OperatingMode::Player).await.unwrap();
    assert!(controller.is_listening());
    assert!(controller.remote_view().is_none());
    controller.stop().await;
    assert!(!controller.is_listening());
}

#[tokio::test]
async fn controller_starts_in_persisted_mode() {
    let player = TestPlayer::start(1).await;
    player
        .settings
        .set_operating_mode(OperatingMode::Remote)
        .await
        .unwrap();
    let mut controller = controller(player.settings.clone(), &player);

    controller.start().await.unwrap();
    assert_eq!(controller.mode(), OperatingMode::Remote);
    assert!(!controller.is_listening());
}

#[tokio::test]
async fn entering_remote_mode_silences_local_playback() {
    let player = TestPlayer::start_playing(2).await;
    player.wait_for_plays(1).await;
    let mut controller = controller(player.settings.clone(), &player);

    controller.start().await.unwrap();
    assert!(player.engine.lock().unwrap().playing);

    controller.switch(OperatingMode::Remote).await.unwrap();
    assert!(!player.engine.lock().unwrap().playing);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(player.engine.lock().unwrap().played.len(), 1);

    controller.switch(OperatingMode::Player).await.unwrap();
    let played = player.wait_for_plays(2).await;
    assert_eq!(played[1], "http://127.0.0.1:1/s0");
    controller.stop().await;
}

#[tokio::test]
async fn starting_in_remote_mode_stops_autoplay() {
    let player = TestPlayer::start_playing(1).await;
    player.wait_for_plays(1).await;
    player
        .settings
        .set_operating_mode(OperatingMode::Remote)
        .await
        .unwrap();
    let mut controller = controller(player.settings.clone(), &player);

    controller.start().await.unwrap();
    assert!(!player.engine.lock().unwrap().playing);

    // Stopping is not muting.
    assert!(player.handle.snapshot().is_some_and(|s| !s.muted));
}
