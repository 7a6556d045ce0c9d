use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest request or reply line accepted, excluding the line break.
pub const MAX_LINE_BYTES: usize = 4096;

/// Field separator inside a command line, e.g. `SELECT_STATION|2`.
pub const FIELD_SEPARATOR: char = '|';

const SELECT_STATION_PREFIX: &str = "SELECT_STATION|";
const TEST_URL_PREFIX: &str = "TESTURL|";
const STATE_PREFIX: &str = "STATE";
const ERROR_PREFIX: &str = "ERROR:";

/// Requests sent from Remote to Player.  One command per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    SelectStation { index: i32 },
    Mute,
    Unmute,
    GetState,
    /// Diagnostic hook: play an arbitrary URL on the Player.
    TestUrl { url: String },
}

/// Why a line could not be turned into a [`Command`] or [`Response`].
///
/// The `Display` text is exactly what follows `ERROR:` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid station index")]
    InvalidStationIndex,
    #[error("Invalid number of parts")]
    InvalidPartCount,
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Line too long")]
    LineTooLong,
    #[error("Malformed state reply: {0}")]
    MalformedState(String),
    #[error("Unexpected reply: {0}")]
    UnexpectedResponse(String),
}

impl Command {
    /// Decode one request line.  A trailing `\r` is tolerated.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches('\r');

        match line {
            "PING" => return Ok(Command::Ping),
            "MUTE" => return Ok(Command::Mute),
            "UNMUTE" => return Ok(Command::Unmute),
            "GET_STATE" => return Ok(Command::GetState),
            _ => {}
        }

        if line.starts_with(SELECT_STATION_PREFIX) {
            let parts: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
            if parts.len() != 2 {
                return Err(ProtocolError::InvalidStationIndex);
            }
            return parts[1]
                .parse::<i32>()
                .map(|index| Command::SelectStation { index })
                .map_err(|_| ProtocolError::InvalidStationIndex);
        }

        if line.starts_with(TEST_URL_PREFIX) {
            let parts: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
            if parts.len() != 2 {
                return Err(ProtocolError::InvalidPartCount);
            }
            return Ok(Command::TestUrl {
                url: parts[1].to_string(),
            });
        }

        Err(ProtocolError::UnknownCommand)
    }

    /// Encode as a wire line, without the terminating newline.
    pub fn encode(&self) -> String {
        match self {
            Command::Ping => "PING".to_string(),
            Command::SelectStation { index } => format!("{}{}", SELECT_STATION_PREFIX, index),
            Command::Mute => "MUTE".to_string(),
            Command::Unmute => "UNMUTE".to_string(),
            Command::GetState => "GET_STATE".to_string(),
            Command::TestUrl { url } => format!("{}{}", TEST_URL_PREFIX, url),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Snapshot of the Player's selection and mute flag, as carried by
/// `STATE:<index>:<MUTED|PLAYING>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub station_index: usize,
    pub muted: bool,
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            STATE_PREFIX,
            self.station_index,
            if self.muted { "MUTED" } else { "PLAYING" }
        )
    }
}

impl FromStr for StateSnapshot {
    type Err = ProtocolError;

    /// Requires exactly three `:`-separated parts.  Anything else, including
    /// an `ERROR:` reply, is rejected instead of being half-parsed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('\r');
        let malformed = || ProtocolError::MalformedState(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != STATE_PREFIX {
            return Err(malformed());
        }
        let station_index = parts[1].parse::<usize>().map_err(|_| malformed())?;
        let muted = match parts[2] {
            "MUTED" => true,
            "PLAYING" => false,
            _ => return Err(malformed()),
        };
        Ok(Self {
            station_index,
            muted,
        })
    }
}

/// Replies sent from Player to Remote.  One response line per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    Ok,
    State(StateSnapshot),
    Error(String),
}

impl Response {
    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error(reason.into())
    }

    pub fn encode(&self) -> String {
        match self {
            Response::Pong => "PONG".to_string(),
            Response::Ok => "OK".to_string(),
            Response::State(snapshot) => snapshot.to_string(),
            Response::Error(reason) => format!("{}{}", ERROR_PREFIX, reason),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches('\r');
        match line {
            "PONG" => Ok(Response::Pong),
            "OK" => Ok(Response::Ok),
            _ => {
                if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
                    Ok(Response::Error(reason.to_string()))
                } else if line.starts_with(STATE_PREFIX) {
                    line.parse().map(Response::State)
                } else {
                    Err(ProtocolError::UnexpectedResponse(line.to_string()))
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Error(err.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// One line read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// Line without its terminator.  Invalid UTF-8 is replaced, not
    /// rejected, so it still reaches the parser and gets an `ERROR:` reply.
    Line(String),
    /// Longer than `MAX_LINE_BYTES`; the rest of it has been discarded.
    TooLong,
    Eof,
}

/// Read one `\n`-terminated line, buffering at most `MAX_LINE_BYTES + 1`
/// bytes.  An over-long line is skipped up to and including its `\n`, so
/// the next line can be read normally.  `buf` is scratch space.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.last() == Some(&b'\n') || buf.len() <= MAX_LINE_BYTES {
        let line = String::from_utf8_lossy(buf);
        return Ok(LineRead::Line(line.trim_end_matches(['\r', '\n']).to_string()));
    }

    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(LineRead::Eof);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(LineRead::TooLong);
        }
    }
}
