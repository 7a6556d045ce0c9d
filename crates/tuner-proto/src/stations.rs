use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::StationsConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Station {
    pub name: String,
    pub url: String,
    /// Artwork path, relative to the station file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Station {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            image: None,
        }
    }
}

/// Shape of the JSON station file: `{"station": [{"name", "url", "image"}]}`.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    station: Vec<Station>,
}

pub fn parse_settings_json(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: SettingsFile = serde_json::from_str(content)?;
    Ok(file.station)
}

// ── TOML station loader ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    name: String,
    url: String,
    #[serde(default)]
    image: Option<String>,
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    Ok(file
        .station
        .into_iter()
        .map(|s| Station {
            name: s.name,
            url: s.url,
            image: s.image,
        })
        .collect())
}

// ── M3U station loader ────────────────────────────────────────────────────────

/// Parse an extended M3U station list.  `#EXTINF:-1,Name` lines name the URL
/// that follows; unnamed entries use the URL as their name.
pub fn parse_m3u_from_str(content: &str) -> Vec<Station> {
    let mut stations = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let name = pending_name.take().unwrap_or_else(|| url.clone());
        stations.push(Station::new(name, url));
    }

    stations
}

/// Built-in list used when no station file loads.
pub fn fallback_stations() -> Vec<Station> {
    vec![
        Station::new(
            "ABC Triple J NSW",
            "https://live-radio01.mediahubaustralia.com/2TJW/mp3/",
        ),
        Station::new("Q-Music", "https://stream.qmusic.nl/qmusic/mp3"),
        Station::new(
            "Radio 538",
            "https://playerservices.streamtheworld.com/api/livestream-redirect/RADIO538.mp3",
        ),
    ]
}

fn load_file(path: &Path, parse: fn(&str) -> anyhow::Result<Vec<Station>>) -> Option<Vec<Station>> {
    if !path.exists() {
        return None;
    }
    let result = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|content| parse(&content));
    match result {
        Ok(stations) if !stations.is_empty() => {
            info!("Loaded {} stations from {:?}", stations.len(), path);
            Some(stations)
        }
        Ok(_) => {
            warn!("Station file {:?} is empty", path);
            None
        }
        Err(e) => {
            warn!("Failed to parse station file {:?}: {}", path, e);
            None
        }
    }
}

/// Load the station list: JSON settings, then TOML, then M3U, then the
/// built-in fallback.  Never returns an empty list.
pub fn load_stations(config: &StationsConfig) -> Vec<Station> {
    if let Some(stations) = load_file(&config.settings_json, parse_settings_json) {
        return stations;
    }
    if let Some(stations) = load_file(&config.stations_toml, parse_stations_from_toml_str) {
        return stations;
    }
    if let Some(path) = &config.m3u {
        if let Some(stations) = load_file(path, |s| Ok(parse_m3u_from_str(s))) {
            return stations;
        }
    }

    warn!("No station file found, using fallback stations");
    fallback_stations()
}

/// Position of the station called `name`, if present.
pub fn index_of(stations: &[Station], name: &str) -> Option<usize> {
    stations.iter().position(|s| s.name == name)
}
