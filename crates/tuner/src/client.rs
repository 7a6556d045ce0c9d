use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tuner_proto::config::RemoteConfig;
use tuner_proto::platform::peer_address;
use tuner_proto::protocol::{self, Command, LineRead, ProtocolError, Response, StateSnapshot};

/// Transport and reply failures on the Remote side.  The `Display` text is
/// what `send_command` puts after `ERROR:`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection timeout")]
    ConnectionTimeout,
    #[error("Response timeout")]
    ResponseTimeout,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The Player answered with `ERROR:<reason>`.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Remote-side client.  Every call opens a fresh connection, sends one line
/// and reads one line back.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl Default for RemoteClient {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

impl RemoteClient {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            response_timeout,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.connect_timeout(), config.response_timeout())
    }

    /// `PING` the Player; true only on an exact `PONG`.
    pub async fn test_connection(&self, address: &str) -> bool {
        match self.exchange(address, &Command::Ping).await {
            Ok(reply) if reply == "PONG" => {
                info!("Successfully connected to player at {}", address);
                true
            }
            Ok(reply) => {
                warn!("Unexpected response: {}", reply);
                false
            }
            Err(e) => {
                warn!("Connection test failed: {}", e);
                false
            }
        }
    }

    /// Send `command` and return the reply line verbatim, or a synthesised
    /// `ERROR:<reason>` line.  Never fails.
    pub async fn send_command(&self, address: &str, command: &Command) -> String {
        match self.exchange(address, command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to send command {}: {}", command, e);
                Response::error(e.to_string()).encode()
            }
        }
    }

    /// `GET_STATE` with the reply checked against the
    /// `STATE:<index>:<MUTED|PLAYING>` shape.
    pub async fn fetch_state(&self, address: &str) -> Result<StateSnapshot, ClientError> {
        let reply = self.exchange(address, &Command::GetState).await?;
        match Response::parse(&reply)? {
            Response::State(snapshot) => Ok(snapshot),
            Response::Error(reason) => Err(ClientError::Rejected(reason)),
            _ => Err(ProtocolError::UnexpectedResponse(reply).into()),
        }
    }

    /// One request/response exchange on a fresh connection.
    pub async fn exchange(&self, address: &str, command: &Command) -> Result<String, ClientError> {
        let address = peer_address(address);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)??;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        let request = async {
            let mut line = command.encode();
            line.push('\n');
            write_half.write_all(line.as_bytes()).await?;
            protocol::read_line(&mut reader, &mut buf).await
        };

        let reply = match tokio::time::timeout(self.response_timeout, request)
            .await
            .map_err(|_| ClientError::ResponseTimeout)??
        {
            LineRead::Line(reply) => reply,
            LineRead::TooLong => return Err(ProtocolError::LineTooLong.into()),
            LineRead::Eof => return Err(ClientError::ConnectionClosed),
        };
        debug!("{} -> {}: {}", command, address, reply);
        Ok(reply)
    }
}
