//! Playback engine seam.
//!
//! The player core only ever asks an engine to play a resolved URL, stop,
//! or change mute, and polls the load state once per tick.  Decoding lives
//! behind this trait; `MpvEngine` drives an `mpv` child process.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Line mpv prints once audio actually starts.
const READY_MARKER: &str = "TUNER_PLAYBACK_READY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
    Timeout,
}

pub trait PlaybackEngine: Send {
    /// Start loading `url`.  Any previous stream is stopped first.
    fn play(&mut self, url: &str) -> anyhow::Result<()>;

    fn stop(&mut self);

    /// Muting silences output by stopping the stream.  Unmuting only clears
    /// the flag; the owner restarts playback.
    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Poll the current load state.  Must reach Ready, Error or Timeout
    /// within the engine's load timeout after `play`.
    fn load_state(&mut self) -> LoadState;
}

// ── mpv ───────────────────────────────────────────────────────────────────────

struct MpvSession {
    child: Child,
    started: Instant,
    ready: Arc<AtomicBool>,
    state: LoadState,
}

pub struct MpvEngine {
    binary: std::path::PathBuf,
    load_timeout: Duration,
    session: Option<MpvSession>,
    muted: bool,
}

impl MpvEngine {
    pub fn new(load_timeout: Duration) -> anyhow::Result<Self> {
        let binary = tuner_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: using {:?}", binary);
        Ok(Self::with_binary(binary, load_timeout))
    }

    /// Drive a specific mpv-compatible executable.
    pub fn with_binary(binary: impl Into<std::path::PathBuf>, load_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            load_timeout,
            session: None,
            muted: false,
        }
    }

    fn spawn(&self, url: &str) -> anyhow::Result<MpvSession> {
        let mut child = Command::new(&self.binary)
            .arg("--no-video")
            .arg("--quiet")
            .arg(format!("--term-playing-msg={}", READY_MARKER))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let ready = Arc::new(AtomicBool::new(false));
        if let Some(stdout) = child.stdout.take() {
            let ready = ready.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim() == READY_MARKER {
                        ready.store(true, Ordering::Relaxed);
                    } else {
                        debug!("mpv: {}", line);
                    }
                }
            });
        }

        Ok(MpvSession {
            child,
            started: Instant::now(),
            ready,
            state: LoadState::Loading,
        })
    }
}

impl PlaybackEngine for MpvEngine {
    fn play(&mut self, url: &str) -> anyhow::Result<()> {
        self.stop();
        info!("mpv: loading stream {}", url);
        self.session = Some(self.spawn(url)?);
        self.muted = false;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.child.start_kill() {
                debug!("mpv: kill failed: {}", e);
            }
            info!("mpv: stream stopped");
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if muted {
            self.stop();
        }
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn load_state(&mut self) -> LoadState {
        let load_timeout = self.load_timeout;
        let Some(session) = self.session.as_mut() else {
            return LoadState::Idle;
        };

        if session.state == LoadState::Loading {
            let exited = matches!(session.child.try_wait(), Ok(Some(_)));
            let ready = session.ready.load(Ordering::Relaxed);
            if ready {
                session.state = LoadState::Ready;
            } else if exited {
                warn!("mpv: exited before playback started");
                session.state = LoadState::Error;
            } else if session.started.elapsed() >= load_timeout {
                warn!("mpv: loading timeout after {:?}", load_timeout);
                let _ = session.child.start_kill();
                session.state = LoadState::Timeout;
            }
        } else if session.state == LoadState::Ready {
            if let Ok(Some(status)) = session.child.try_wait() {
                warn!("mpv: stream ended ({})", status);
                session.state = LoadState::Error;
            }
        }

        session.state
    }
}
