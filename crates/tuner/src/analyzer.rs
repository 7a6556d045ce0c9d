//! One-shot stream diagnostics: status, headers and the first bytes.

use std::fmt;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, SERVER, TRANSFER_ENCODING};
use thiserror::Error;
use tracing::{debug, info};

use crate::resolver::StreamResolver;

/// At most this much of the first body chunk is kept.
const SAMPLE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Aac,
    Ogg,
    Unknown,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Aac => "AAC",
            AudioFormat::Ogg => "OGG",
            AudioFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Guess the container from the first bytes of a stream.
///
/// An ID3 tag or an MPEG audio frame sync means MP3.  ADTS frames share the
/// sync word but carry layer bits `00`, which MPEG audio never uses.
pub fn detect_format(bytes: &[u8]) -> AudioFormat {
    if bytes.starts_with(b"OggS") {
        return AudioFormat::Ogg;
    }
    if bytes.starts_with(b"ID3") {
        return AudioFormat::Mp3;
    }
    match bytes {
        [0xFF, b, ..] if b & 0xF6 == 0xF0 => AudioFormat::Aac,
        [0xFF, b, ..] if b & 0xE0 == 0xE0 && b & 0x06 != 0 => AudioFormat::Mp3,
        _ => AudioFormat::Unknown,
    }
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("no response headers within {0:?}")]
    Timeout(std::time::Duration),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub url: String,
    pub status: u16,
    /// Every response header in arrival order, names lowercased.
    pub headers: Vec<(String, String)>,
    /// Start of the first body chunk; empty for non-2xx answers.
    pub sample: Vec<u8>,
}

impl StreamReport {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `None` when no body bytes arrived.
    pub fn format(&self) -> Option<AudioFormat> {
        (!self.sample.is_empty()).then(|| detect_format(&self.sample))
    }
}

impl fmt::Display for StreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "URL: {}", self.url)?;
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Headers:")?;
        for (name, value) in &self.headers {
            writeln!(f, "  {}: {}", name, value)?;
        }

        let summary = [
            ("Content-Type", CONTENT_TYPE.as_str()),
            ("Transfer-Encoding", TRANSFER_ENCODING.as_str()),
            ("Server", SERVER.as_str()),
            ("ICY-Name", "icy-name"),
            ("ICY-Genre", "icy-genre"),
            ("ICY-BR", "icy-br"),
        ];
        for (label, name) in summary {
            if let Some(value) = self.header(name) {
                writeln!(f, "{}: {}", label, value)?;
            }
        }
        writeln!(
            f,
            "Content-Length: {}",
            self.header(CONTENT_LENGTH.as_str()).unwrap_or("streaming")
        )?;

        match self.format() {
            Some(format) => {
                let hex: Vec<String> = self.sample.iter().map(|b| format!("{:02X}", b)).collect();
                writeln!(f, "First bytes: {}", hex.join(" "))?;
                write!(f, "Format: {}", format)
            }
            None => write!(f, "No data received"),
        }
    }
}

/// Request `url` once with the resolver's client and headers and read only
/// the first body chunk.  Redirects are reported, not followed.
pub async fn analyze(resolver: &StreamResolver, url: &str) -> Result<StreamReport, AnalyzeError> {
    info!("Analyzing stream: {}", url);
    let timeout = resolver.header_timeout();

    let mut response = tokio::time::timeout(timeout, resolver.request(url).send())
        .await
        .map_err(|_| AnalyzeError::Timeout(timeout))??;

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let mut sample = Vec::new();
    if status.is_success() {
        match tokio::time::timeout(timeout, response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                sample.extend_from_slice(&chunk[..chunk.len().min(SAMPLE_BYTES)]);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => debug!("analyzer: body read failed: {}", e),
            Err(_) => debug!("analyzer: no body within {:?}", timeout),
        }
    }

    Ok(StreamReport {
        url: url.to_string(),
        status: status.as_u16(),
        headers,
        sample,
    })
}
