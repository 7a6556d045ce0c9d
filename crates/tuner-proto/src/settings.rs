use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Which role this device plays.  Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OperatingMode {
    #[default]
    Player,
    Remote,
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Player => f.write_str("player"),
            OperatingMode::Remote => f.write_str("remote"),
        }
    }
}

/// Values persisted across restarts.  The station is stored by name so a
/// reordered station list still restores the right one.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub current_station: String,
    #[serde(default)]
    pub operating_mode: OperatingMode,
    #[serde(default)]
    pub player_address: String,
    #[serde(default)]
    pub test_url: String,
}

pub struct SettingsStore {
    settings: RwLock<Settings>,
    path: PathBuf,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let settings = Self::load(&path);
        Self {
            settings: RwLock::new(settings),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn current_station_name(&self) -> String {
        self.settings.read().await.current_station.clone()
    }

    pub async fn operating_mode(&self) -> OperatingMode {
        self.settings.read().await.operating_mode
    }

    pub async fn player_address(&self) -> String {
        self.settings.read().await.player_address.clone()
    }

    pub async fn test_url(&self) -> String {
        self.settings.read().await.test_url.clone()
    }

    /// Empty names are ignored; the previous value stays.
    pub async fn set_current_station_name(&self, name: &str) -> anyhow::Result<()> {
        self.update(|s| {
            if !name.is_empty() {
                s.current_station = name.to_string();
            }
        })
        .await
    }

    pub async fn set_operating_mode(&self, mode: OperatingMode) -> anyhow::Result<()> {
        tracing::info!("Setting operating mode to: {}", mode);
        self.update(|s| s.operating_mode = mode).await
    }

    /// Empty addresses are ignored; the previous value stays.
    pub async fn set_player_address(&self, address: &str) -> anyhow::Result<()> {
        self.update(|s| {
            if !address.is_empty() {
                s.player_address = address.to_string();
            }
        })
        .await
    }

    /// Empty URLs are ignored; the previous value stays.
    pub async fn set_test_url(&self, url: &str) -> anyhow::Result<()> {
        self.update(|s| {
            if !url.is_empty() {
                s.test_url = url.to_string();
            }
        })
        .await
    }

    async fn update(&self, f: impl FnOnce(&mut Settings)) -> anyhow::Result<()> {
        let snapshot = {
            let mut settings = self.settings.write().await;
            f(&mut settings);
            settings.clone()
        };
        self.save(&snapshot).await
    }

    async fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    fn load(path: &Path) -> Settings {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => return settings,
                Err(e) => tracing::warn!("Ignoring unreadable settings {:?}: {}", path, e),
            }
        }
        Settings::default()
    }
}
