#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tuner::core::{PlayerCore, PlayerHandle};
use tuner::engine::{LoadState, PlaybackEngine};
use tuner::listener::Listener;
use tuner::resolver::StreamResolver;
use tuner_proto::config::ResolverConfig;
use tuner_proto::settings::SettingsStore;
use tuner_proto::stations::Station;

/// What the fake engine has been asked to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub played: Vec<String>,
    pub stops: usize,
    pub muted: bool,
    /// Something is playing right now.
    pub playing: bool,
}

/// Engine that never touches audio; reports Ready as soon as it plays.
pub struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
}

impl FakeEngine {
    pub fn new() -> (Self, Arc<Mutex<EngineLog>>) {
        let log = Arc::new(Mutex::new(EngineLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl PlaybackEngine for FakeEngine {
    fn play(&mut self, url: &str) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.played.push(url.to_string());
        log.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.playing = false;
    }

    fn set_muted(&mut self, muted: bool) {
        self.log.lock().unwrap().muted = muted;
        if muted {
            self.stop();
        }
    }

    fn is_muted(&self) -> bool {
        self.log.lock().unwrap().muted
    }

    fn load_state(&mut self) -> LoadState {
        if self.log.lock().unwrap().playing {
            LoadState::Ready
        } else {
            LoadState::Idle
        }
    }
}

/// Stations whose URLs refuse connections immediately.  Resolution gives
/// up on the first step and the seed is handed to the engine unchanged.
pub fn stations(count: usize) -> Vec<Station> {
    (0..count)
        .map(|i| Station::new(format!("Station {}", i), format!("http://127.0.0.1:1/s{}", i)))
        .collect()
}

pub fn resolver() -> StreamResolver {
    StreamResolver::new(&ResolverConfig::default())
        .unwrap()
        .with_header_timeout(Duration::from_secs(2))
}

/// A running core with a fake engine and settings in a temp dir.
pub struct TestPlayer {
    pub handle: PlayerHandle,
    pub engine: Arc<Mutex<EngineLog>>,
    pub settings: Arc<SettingsStore>,
    pub cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestPlayer {
    pub async fn start(station_count: usize) -> Self {
        Self::launch(station_count, false).await
    }

    /// Like `start`, but the current station plays right away.
    pub async fn start_playing(station_count: usize) -> Self {
        Self::launch(station_count, true).await
    }

    async fn launch(station_count: usize, autoplay: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::open(dir.path().join("settings.json")));
        let (engine, log) = FakeEngine::new();

        let (core, handle) = PlayerCore::new(
            stations(station_count),
            Box::new(engine),
            resolver(),
            settings.clone(),
        )
        .await;
        let core = core
            .with_tick(Duration::from_millis(5))
            .with_autoplay(autoplay);

        let cancel = CancellationToken::new();
        tokio::spawn(core.run(cancel.clone()));

        Self {
            handle,
            engine: log,
            settings,
            cancel,
            _dir: dir,
        }
    }

    /// Wait until the engine has been asked to play `count` URLs.
    pub async fn wait_for_plays(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            {
                let log = self.engine.lock().unwrap();
                if log.played.len() >= count {
                    return log.played.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never reached {} plays", count);
    }
}

impl Drop for TestPlayer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Listener on an ephemeral loopback port.
pub async fn start_listener(handle: PlayerHandle) -> (Listener, SocketAddr) {
    let mut listener = Listener::new("127.0.0.1", 0, handle);
    let addr = listener.start().await.unwrap();
    (listener, addr)
}

/// Send each line on one connection and collect one reply per line.
pub async fn converse(addr: SocketAddr, requests: &[&str]) -> Vec<String> {
    let requests: Vec<&[u8]> = requests.iter().map(|r| r.as_bytes()).collect();
    converse_bytes(addr, &requests).await
}

/// Like [`converse`] for requests that are not valid text.
pub async fn converse_bytes(addr: SocketAddr, requests: &[&[u8]]) -> Vec<String> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut replies = Vec::new();
    for request in requests {
        let mut line = request.to_vec();
        line.push(b'\n');
        write_half.write_all(&line).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("reply timed out")
            .unwrap()
            .expect("connection closed early");
        replies.push(reply);
    }
    replies
}

/// Serve `router` on an ephemeral loopback port.
pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
