mod common;

use std::time::Duration;

use common::{converse, converse_bytes, start_listener, TestPlayer};
use tokio::sync::{mpsc, watch};
use tuner::core::PlayerHandle;
use tuner::listener::{Listener, ListenerError};
use tuner_proto::protocol::{StateSnapshot, MAX_LINE_BYTES};

#[tokio::test]
async fn ping_answers_pong() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    assert_eq!(converse(addr, &["PING"]).await, ["PONG"]);
}

#[tokio::test]
async fn select_then_state_on_one_connection() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(addr, &["SELECT_STATION|2", "GET_STATE"]).await;
    assert_eq!(replies, ["OK", "STATE:2:PLAYING"]);

    let played = player.wait_for_plays(1).await;
    assert_eq!(played, ["http://127.0.0.1:1/s2"]);
    assert_eq!(player.settings.current_station_name().await, "Station 2");
}

#[tokio::test]
async fn select_after_mute_unmutes() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(
        addr,
        &["MUTE", "GET_STATE", "SELECT_STATION|1", "GET_STATE"],
    )
    .await;
    assert_eq!(replies, ["OK", "STATE:0:MUTED", "OK", "STATE:1:PLAYING"]);
}

#[tokio::test]
async fn mute_is_idempotent() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(addr, &["MUTE", "MUTE", "GET_STATE"]).await;
    assert_eq!(replies, ["OK", "OK", "STATE:0:MUTED"]);
    assert!(player.engine.lock().unwrap().muted);
}

#[tokio::test]
async fn unmute_restarts_current_station() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    converse(addr, &["SELECT_STATION|1"]).await;
    player.wait_for_plays(1).await;

    let replies = converse(addr, &["MUTE", "UNMUTE", "GET_STATE"]).await;
    assert_eq!(replies, ["OK", "OK", "STATE:1:PLAYING"]);

    let played = player.wait_for_plays(2).await;
    assert_eq!(played[1], "http://127.0.0.1:1/s1");
}

#[tokio::test]
async fn bad_requests_get_error_lines() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(
        addr,
        &[
            "SELECT_STATION|abc",
            "SELECT_STATION|1|2",
            "TESTURL|http://a|b",
            "TESTURL",
            "PING",
        ],
    )
    .await;
    assert_eq!(
        replies,
        [
            "ERROR:Invalid station index",
            "ERROR:Invalid station index",
            "ERROR:Invalid number of parts",
            "ERROR:Unknown command",
            "PONG",
        ]
    );
}

#[tokio::test]
async fn invalid_utf8_is_an_unknown_command() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse_bytes(addr, &[b"PI\xffNG", b"PING"]).await;
    assert_eq!(replies, ["ERROR:Unknown command", "PONG"]);
}

#[tokio::test]
async fn over_long_line_is_rejected_and_skipped() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let mut flood = b"SELECT_STATION|".to_vec();
    flood.resize(MAX_LINE_BYTES * 4, b'1');
    let replies = converse_bytes(addr, &[&flood, b"GET_STATE"]).await;
    assert_eq!(replies, ["ERROR:Line too long", "STATE:0:PLAYING"]);
    assert!(player.engine.lock().unwrap().played.is_empty());
}

#[tokio::test]
async fn out_of_range_select_is_acknowledged_and_ignored() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(addr, &["SELECT_STATION|7", "SELECT_STATION|-1", "GET_STATE"]).await;
    assert_eq!(replies, ["OK", "OK", "STATE:0:PLAYING"]);
    assert!(player.engine.lock().unwrap().played.is_empty());
}

#[tokio::test]
async fn test_url_plays_and_persists() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let replies = converse(addr, &["TESTURL|http://127.0.0.1:1/check.mp3"]).await;
    assert_eq!(replies, ["OK"]);

    let played = player.wait_for_plays(1).await;
    assert_eq!(played, ["http://127.0.0.1:1/check.mp3"]);
    assert_eq!(player.settings.test_url().await, "http://127.0.0.1:1/check.mp3");
}

#[tokio::test]
async fn state_without_handler_is_an_error() {
    let (intent_tx, _intent_rx) = mpsc::channel(1);
    let handle = PlayerHandle::new(intent_tx, None);
    let (_listener, addr) = start_listener(handle).await;

    assert_eq!(
        converse(addr, &["GET_STATE"]).await,
        ["ERROR:No state handler"]
    );
}

#[tokio::test]
async fn commands_without_player_report_it() {
    let (intent_tx, intent_rx) = mpsc::channel(1);
    drop(intent_rx);
    let (_state_tx, state_rx) = watch::channel(StateSnapshot::default());
    let handle = PlayerHandle::new(intent_tx, Some(state_rx));
    let (_listener, addr) = start_listener(handle).await;

    assert_eq!(
        converse(addr, &["MUTE", "GET_STATE"]).await,
        ["ERROR:Player not running", "STATE:0:PLAYING"]
    );
}

#[tokio::test]
async fn connections_are_served_concurrently() {
    let player = TestPlayer::start(3).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    // A client that connects and says nothing must not hold up others.
    let _silent = tokio::net::TcpStream::connect(addr).await.unwrap();

    let replies = tokio::time::timeout(Duration::from_secs(2), converse(addr, &["PING"]))
        .await
        .unwrap();
    assert_eq!(replies, ["PONG"]);
}

#[tokio::test]
async fn empty_line_closes_connection() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let player = TestPlayer::start(1).await;
    let (_listener, addr) = start_listener(player.handle.clone()).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn start_twice_keeps_listening() {
    let player = TestPlayer::start(1).await;
    let (mut listener, addr) = start_listener(player.handle.clone()).await;

    assert_eq!(listener.start().await.unwrap(), addr);
    assert!(listener.is_listening());
    assert_eq!(converse(addr, &["PING"]).await, ["PONG"]);
}

#[tokio::test]
async fn bind_failure_leaves_listener_stopped() {
    let player = TestPlayer::start(1).await;
    let (_first, addr) = start_listener(player.handle.clone()).await;

    let mut second = Listener::new("127.0.0.1", addr.port(), player.handle.clone());
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, ListenerError::Bind { .. }));
    assert!(!second.is_listening());
}

#[tokio::test]
async fn stop_releases_port() {
    let player = TestPlayer::start(1).await;
    let (mut listener, addr) = start_listener(player.handle.clone()).await;

    listener.stop().await;
    assert!(!listener.is_listening());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());

    let mut again = Listener::new("127.0.0.1", addr.port(), player.handle.clone());
    assert_eq!(again.start().await.unwrap(), addr);
    assert_eq!(converse(addr, &["PING"]).await, ["PONG"]);
}
