use crate::data::DatasetSource;
use crate::engine::SurfaceConfig;
use crate::session::SessionConfig;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `engine.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "MAPBOX_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub engine: SurfaceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default = "default_name_property")]
    pub name_property: String,
    pub fetch_timeout_secs: Option<u64>,
}

fn default_name_property() -> String {
    "name".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_ms: 1000, seed: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub url: String,
    /// Set when the globe is shown inside the dashboard itself.
    pub embedded: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: "https://ai-threat-intel-dashboard.streamlit.app".to_string(),
            embedded: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5173, static_dir: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConfig {
    pub width: u32,
    pub height: u32,
    pub out_dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 720,
            out_dir: PathBuf::from("output/frames"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            config.engine.access_token = token;
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.dataset.source()?;
        if self.refresh.interval_ms == 0 {
            bail!("refresh.interval_ms must be greater than zero");
        }
        if self.snapshot.width == 0 || self.snapshot.height == 0 {
            bail!("snapshot width and height must be greater than zero");
        }
        Ok(())
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            surface: self.engine.clone(),
            dataset: self.dataset.source()?,
            name_property: self.dataset.name_property.clone(),
            refresh_interval: Duration::from_millis(self.refresh.interval_ms),
            fetch_timeout: self.dataset.fetch_timeout_secs.map(Duration::from_secs),
        })
    }
}

impl DatasetConfig {
    pub fn source(&self) -> Result<DatasetSource> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(DatasetSource::Url(url.clone())),
            (None, Some(path)) => Ok(DatasetSource::File(path.clone())),
            (Some(_), Some(_)) => Err(anyhow!("dataset must set either `url` or `path`, not both")),
            (None, None) => Err(anyhow!("dataset must set `url` or `path`")),
        }
    }
}
