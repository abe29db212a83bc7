//! Configuration types for chatlog.
//!
//! [`Config::load`] reads `~/.config/chatlog/config.toml`, creating it with
//! hardcoded defaults if it does not yet exist. [`Config::defaults`] returns
//! the same defaults without touching the filesystem (useful in tests).

use crate::codec::FormatMode;
use crate::service::LogService;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[gempir]
host = "api.gempir.com"
port = 443

[overrustle]
host = "overrustlelogs.net"
port = 443

[cache]
dir      = ""
capacity = 64
format   = "auto"

[paste]
dir = ""
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level application configuration, loaded from `~/.config/chatlog/config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gempir: ServiceConfig,
    pub overrustle: ServiceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub paste: PasteConfig,
}

/// `[gempir]` / `[overrustle]` sections.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 { 443 }

/// `[cache]` section of `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Empty means `$XDG_CACHE_HOME/chatlog`.
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub format: FormatChoice,
}

fn default_capacity() -> usize { 64 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            capacity: default_capacity(),
            format: FormatChoice::Auto,
        }
    }
}

impl CacheConfig {
    pub fn dir(&self) -> PathBuf {
        if self.dir.is_empty() {
            cache_home().join("chatlog")
        } else {
            PathBuf::from(&self.dir)
        }
    }
}

/// `format = "auto" | "u16" | "u32" | "u64"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatChoice {
    #[default]
    Auto,
    U16,
    U32,
    U64,
}

impl FormatChoice {
    /// The forced mode, or `None` to pick per log.
    pub fn mode(self) -> Option<FormatMode> {
        match self {
            FormatChoice::Auto => None,
            FormatChoice::U16 => Some(FormatMode::U16),
            FormatChoice::U32 => Some(FormatMode::U32),
            FormatChoice::U64 => Some(FormatMode::U64),
        }
    }
}

/// `[paste]` section of `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasteConfig {
    /// Empty means the system temp dir.
    #[serde(default)]
    pub dir: String,
}

impl PasteConfig {
    pub fn dir(&self) -> PathBuf {
        if self.dir.is_empty() {
            std::env::temp_dir().join("chatlog-paste")
        } else {
            PathBuf::from(&self.dir)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load from `~/.config/chatlog/config.toml`, layered on top of the
    /// built-in defaults. Creates the file with defaults if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_CONFIG.trim_start())?;
        }

        Self::load_from(&path)
    }

    /// Load `path` layered on top of the built-in defaults. A missing file
    /// yields the defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path).required(false))
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Host and port for `service`.
    pub fn service(&self, service: LogService) -> &ServiceConfig {
        match service {
            LogService::Gempir => &self.gempir,
            LogService::Overrustle => &self.overrustle,
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

fn config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("chatlog")
        .join("config.toml")
}

fn cache_home() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".cache"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
