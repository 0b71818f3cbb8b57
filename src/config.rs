use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Mixed into every token checksum. Both sides must agree on it.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,

    /// How long to collect local candidates before minting a token.
    #[serde(default = "default_candidate_window_ms")]
    pub candidate_window_ms: u64,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "enabled")]
    pub video: bool,
    #[serde(default = "enabled")]
    pub audio: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// `config.toml` in the platform config directory, or the working directory
/// when there is none.
pub fn default_path() -> PathBuf {
    match ProjectDirs::from("app", "mirashare", "mira-p2p") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

pub fn load(path: &Path) -> Result<Config> {
    // create a new file if it does not exist
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        let config = toml::from_str::<Config>("")?;
        info!("Writing default config to {}", path.display());
        debug!("config {:#?}", config);
        file.write_all(toml::to_string(&config)?.as_ref())?;
        return Ok(config);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(toml::from_str(&contents)?)
}

fn default_token_secret() -> String {
    "mira-p2p-shared-secret".to_string()
}

fn default_candidate_window_ms() -> u64 {
    3000
}

fn default_display_name() -> String {
    "me".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn enabled() -> bool {
    true
}

fn stun(url: &str) -> IceServerConfig {
    IceServerConfig {
        urls: vec![url.to_string()],
        username: String::new(),
        credential: String::new(),
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        stun("stun:stun.l.google.com:19302"),
        stun("stun:stun1.l.google.com:19302"),
    ]
}
