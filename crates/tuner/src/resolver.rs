//! Stream URL resolver.
//!
//! Station directories rarely hand out a raw audio URL.  A typical seed URL
//! answers with a redirect chain that ends in a tiny M3U or PLS file, and
//! audio decoders do not understand either.  `StreamResolver` walks that
//! chain itself:
//!
//! ```text
//!   seed ──GET──► 3xx Location ──join──► next ──GET──► 200 playlist
//!                                                        │ first entry
//!                                                        ▼
//!                                                      next ──GET──► 200 audio/* ──► done
//! ```
//!
//! Redirects are never followed by the HTTP client so that relative
//! `Location` values can be joined against the URL that produced them.  The
//! walk is capped at `max_steps` requests and never fails: whatever URL is
//! current when it stops is returned, and playback reports its own error.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, ACCEPT, ACCEPT_ENCODING, CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION, USER_AGENT,
};
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, info, warn};
use tuner_proto::config::ResolverConfig;

/// Upper bound on how much of a playlist body is read.
const MAX_PLAYLIST_BYTES: usize = 64 * 1024;

const PLAYLIST_CONTENT_TYPES: &[&str] = &[
    "audio/x-mpegurl",
    "application/vnd.apple.mpegurl",
    "application/mpegurl",
    "audio/mpegurl",
    "audio/x-scpls",
    "application/pls",
    "audio/pls",
    // Generic types that directories commonly use for playlist downloads.
    "text/plain",
    "application/force-download",
];

const PLAYLIST_EXTENSIONS: &[&str] = &[".m3u", ".m3u8", ".pls"];

/// Why the resolution walk stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 2xx without any playlist signal: the URL is the stream.
    Direct,
    /// Looked like a playlist but held no usable entry.  The URL is still
    /// handed to playback as if it were the stream.
    EmptyPlaylist,
    RedirectWithoutLocation,
    /// Terminal status that is neither 2xx nor 3xx.
    Status(u16),
    /// No status line within the header timeout.
    HeaderTimeout,
    Network(String),
    /// `max_steps` requests were spent, mid-chain.
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    /// Number of HTTP requests issued.
    pub steps: usize,
    pub reason: StopReason,
}

impl Resolution {
    /// True when the walk ended on something believed to be playable.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.reason,
            StopReason::Direct | StopReason::EmptyPlaylist | StopReason::StepLimit
        )
    }
}

enum Step {
    Continue(String),
    Stop(StopReason),
}

#[derive(Clone)]
pub struct StreamResolver {
    client: Client,
    max_steps: usize,
    header_timeout: Duration,
    user_agent: String,
}

impl StreamResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_steps: config.max_steps,
            header_timeout: config.header_timeout(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Resolve `seed` to a directly playable URL.  Never fails.
    pub async fn resolve(&self, seed: &str) -> String {
        self.resolve_detailed(seed).await.url
    }

    pub async fn resolve_detailed(&self, seed: &str) -> Resolution {
        let mut current = seed.to_string();
        info!("Resolving stream URL: {}", current);

        for step in 0..self.max_steps {
            match self.step(&current).await {
                Step::Continue(next) => {
                    debug!("resolver: step {} {} -> {}", step + 1, current, next);
                    current = next;
                }
                Step::Stop(reason) => {
                    match &reason {
                        StopReason::Direct => {}
                        StopReason::HeaderTimeout => {
                            warn!("resolver: timed out waiting for headers from {}", current)
                        }
                        other => warn!("resolver: stopped at {}: {:?}", current, other),
                    }
                    info!("Resolved URL: {}", current);
                    return Resolution {
                        url: current,
                        steps: step + 1,
                        reason,
                    };
                }
            }
        }

        warn!(
            "resolver: gave up after {} steps, using {}",
            self.max_steps, current
        );
        Resolution {
            url: current,
            steps: self.max_steps,
            reason: StopReason::StepLimit,
        }
    }

    /// GET `url` the way a media player would: no redirects, no compression.
    pub(crate) fn request(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, "audio/*")
            .header(ACCEPT_ENCODING, "identity")
    }

    pub(crate) fn header_timeout(&self) -> Duration {
        self.header_timeout
    }

    async fn step(&self, url: &str) -> Step {
        let request = self.request(url).send();

        // `send` completes once the status line and headers are in; the body
        // is only pulled later, and only for playlists.
        let response = match tokio::time::timeout(self.header_timeout, request).await {
            Err(_) => return Step::Stop(StopReason::HeaderTimeout),
            Ok(Err(e)) => return Step::Stop(StopReason::Network(e.to_string())),
            Ok(Ok(r)) => r,
        };

        let status = response.status();
        debug!("resolver: {} -> {}", url, status);

        if status.is_redirection() {
            return match header_str(response.headers(), LOCATION.as_str()) {
                Some(location) if !location.is_empty() => {
                    Step::Continue(make_absolute_url(url, &location))
                }
                _ => Step::Stop(StopReason::RedirectWithoutLocation),
            };
        }

        if !status.is_success() {
            return Step::Stop(StopReason::Status(status.as_u16()));
        }

        let content_type = header_str(response.headers(), CONTENT_TYPE.as_str());
        let disposition = header_str(response.headers(), CONTENT_DISPOSITION.as_str());
        if !is_playlist_response(content_type.as_deref(), disposition.as_deref(), url) {
            return Step::Stop(StopReason::Direct);
        }

        let body = match self.read_playlist_body(response).await {
            Some(body) => body,
            None => return Step::Stop(StopReason::EmptyPlaylist),
        };
        match parse_playlist_for_first_url(&body, url) {
            Some(next) => Step::Continue(next),
            None => {
                warn!("Playlist did not contain a playable URL for {}", url);
                Step::Stop(StopReason::EmptyPlaylist)
            }
        }
    }

    /// Read at most `MAX_PLAYLIST_BYTES` of the body within the header
    /// timeout window.  A mislabelled live stream stops at the cap.
    async fn read_playlist_body(&self, mut response: Response) -> Option<String> {
        let read = async {
            let mut body = Vec::new();
            while body.len() < MAX_PLAYLIST_BYTES {
                match response.chunk().await {
                    Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("resolver: playlist body read failed: {}", e);
                        break;
                    }
                }
            }
            body.truncate(MAX_PLAYLIST_BYTES);
            body
        };

        match tokio::time::timeout(self.header_timeout, read).await {
            Ok(body) if !body.is_empty() => Some(String::from_utf8_lossy(&body).into_owned()),
            Ok(_) => None,
            Err(_) => {
                warn!("resolver: timed out reading playlist body");
                None
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Join `location` against `base`.  An unparsable base yields `location`
/// unchanged.
pub fn make_absolute_url(base: &str, location: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(location)) {
        Ok(url) => url.to_string(),
        Err(e) => {
            warn!(
                "Failed to build absolute URL from {} and {}: {}",
                base, location, e
            );
            location.to_string()
        }
    }
}

/// Any of content type, disposition filename or URL extension marks a
/// playlist.
pub fn is_playlist_response(
    content_type: Option<&str>,
    content_disposition: Option<&str>,
    request_url: &str,
) -> bool {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if PLAYLIST_CONTENT_TYPES
        .iter()
        .any(|t| content_type.contains(t))
    {
        return true;
    }

    if let Some(disposition) = content_disposition {
        let disposition = disposition.to_ascii_lowercase();
        if PLAYLIST_EXTENSIONS.iter().any(|ext| disposition.contains(ext)) {
            return true;
        }
    }

    let url = request_url.to_ascii_lowercase();
    let path = Url::parse(&url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    PLAYLIST_EXTENSIONS
        .iter()
        .any(|ext| url.ends_with(ext) || path.ends_with(ext))
}

fn is_absolute_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| !u.cannot_be_a_base())
        .unwrap_or(false)
}

/// First usable entry of an M3U or PLS body.
///
/// Comment lines (`#...`) and section headers (`[playlist]`) are skipped.
/// `FileN=value` lines contribute their value; any other line without `=`
/// is itself a candidate.  The first absolute candidate wins, otherwise the
/// first candidate joined against `base_url`.
pub fn parse_playlist_for_first_url(body: &str, base_url: &str) -> Option<String> {
    let candidates: Vec<&str> = body
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| !(line.starts_with('[') && line.ends_with(']')))
        .filter_map(|line| {
            let is_file_entry = line
                .get(..4)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("file"));
            if is_file_entry {
                line.split_once('=')
                    .map(|(_, value)| value.trim())
                    .filter(|value| !value.is_empty())
            } else if !line.contains('=') {
                Some(line)
            } else {
                None
            }
        })
        .collect();

    if let Some(absolute) = candidates.iter().find(|c| is_absolute_url(c)) {
        return Some(absolute.to_string());
    }

    let base = Url::parse(base_url).ok()?;
    candidates.iter().find_map(|candidate| match base.join(candidate) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!(
                "Failed to resolve relative playlist entry {} against {}: {}",
                candidate, base_url, e
            );
            None
        }
    })
}
