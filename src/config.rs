//! Configuration schema and loading.
//!
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:8080"
//!
//! [topic]
//! marker_header = "x-sluice-protocol"
//!
//! [session]
//! cookie_name = "sid"
//! secure = true
//! same_site = "Strict"
//! max_age = 86400
//! idle_timeout = 1800
//! max_sessions = 100000
//!
//! [cache]
//! dir = "/var/cache/sluice"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub topic: TopicConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:3000".to_owned() }
    }
}

/// How topic requests are recognised.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicConfig {
    pub marker_header: String,
    pub marker_value: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            marker_header: "x-sluice-protocol".to_owned(),
            marker_value: "topic".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

/// Session cookie attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Seconds; a session cookie when unset.
    pub max_age: Option<u64>,
    /// Seconds without a request after which a stored session is dropped.
    /// Capped by `max_age`.
    pub idle_timeout: u64,
    /// Upper bound on stored sessions; the least recently seen go first.
    pub max_sessions: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sluice.sid".to_owned(),
            path: "/".to_owned(),
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            max_age: None,
            idle_timeout: 1800,
            max_sessions: None,
        }
    }
}

impl SessionConfig {
    /// How long a stored session outlives its last request.
    pub fn ttl(&self) -> Duration {
        let secs = self.max_age.map_or(self.idle_timeout, |max_age| max_age.min(self.idle_timeout));
        Duration::from_secs(secs)
    }

    /// `Set-Cookie` value issuing session `id`.
    pub fn set_cookie(&self, id: &str) -> String {
        let mut cookie = format!("{}={id}; Path={}", self.cookie_name, self.path);
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        cookie
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for blobs and `manifest.json`; memory-backed when unset.
    pub dir: Option<PathBuf>,
}
