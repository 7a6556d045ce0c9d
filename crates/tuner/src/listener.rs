use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tuner_proto::protocol::{self, Command, LineRead, ProtocolError, Response};

use crate::core::{PlayerHandle, PlayerIntent};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// Player-side command endpoint.
///
/// `Stopped → Listening → Stopped`.  Every accepted connection runs on its
/// own task; a stalled client never blocks accepts or other clients.
pub struct Listener {
    bind_address: String,
    port: u16,
    player: PlayerHandle,
    running: Option<Running>,
}

impl Listener {
    pub fn new(bind_address: impl Into<String>, port: u16, player: PlayerHandle) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            player,
            running: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind and start accepting.  Already listening: warn and keep going.
    /// Bind failure is logged and leaves the listener stopped.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if let Some(running) = &self.running {
            warn!("Listener already running on {}", running.local_addr);
            return Ok(running.local_addr);
        }

        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to start listener on {}: {}", addr, e);
                return Err(ListenerError::Bind { addr, source: e });
            }
        };
        let local_addr = listener.local_addr().map_err(|e| ListenerError::Bind {
            addr: addr.clone(),
            source: e,
        })?;

        info!("TCP listener started on {}", local_addr);

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, self.player.clone(), cancel.clone()));
        self.running = Some(Running {
            local_addr,
            cancel,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Cancel the accept loop and every connection loop, and release the
    /// port.  Connections mid-exchange are abandoned.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.accept_task.await {
            if !e.is_cancelled() {
                error!("Listener task failed: {}", e);
            }
        }
        info!("TCP listener stopped");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn accept_loop(listener: TcpListener, player: PlayerHandle, cancel: CancellationToken) {
    let mut client_id = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let player = player.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, player, id, cancel).await {
                            warn!("Error handling client {}: {}", id, e);
                        }
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => error!("Error accepting client: {}", e),
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    player: PlayerHandle,
    client_id: usize,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = protocol::read_line(&mut reader, &mut buf) => read?,
        };

        let response: Response = match read {
            // EOF or an empty line ends the conversation.
            LineRead::Eof => break,
            LineRead::Line(line) if line.is_empty() => break,
            LineRead::TooLong => {
                warn!("Client {} sent an over-long line", client_id);
                ProtocolError::LineTooLong.into()
            }
            LineRead::Line(line) => {
                debug!("Client {} sent: {}", client_id, line);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    response = dispatch(&line, &player) => response,
                }
            }
        };

        let mut reply = response.encode();
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await?;
    }

    Ok(())
}

/// Turn one request line into exactly one response.
pub async fn dispatch(line: &str, player: &PlayerHandle) -> Response {
    let command = match Command::parse(line) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };

    let intent = match command {
        Command::Ping => return Response::Pong,
        Command::GetState => {
            return match player.snapshot() {
                Some(snapshot) => Response::State(snapshot),
                None => Response::error("No state handler"),
            }
        }
        Command::SelectStation { index } => PlayerIntent::SelectStation(index),
        Command::Mute => PlayerIntent::Mute,
        Command::Unmute => PlayerIntent::Unmute,
        Command::TestUrl { url } => PlayerIntent::TestUrl(url),
    };

    match player.submit(intent).await {
        Ok(()) => Response::Ok,
        Err(e) => Response::error(e.to_string()),
    }
}
