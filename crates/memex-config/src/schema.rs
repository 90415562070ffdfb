use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root of `memex.yml` / `memex.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemexConfig {
    pub proxy: ProxyConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen address. Go-style `":8080"` binds all interfaces.
    pub listen: String,

    /// Upper bound for a single forwarded request, body included.
    #[serde(with = "duration_str")]
    pub upstream_timeout: Duration,

    /// How long an idle upstream connection stays in the pool.
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,

    /// Zero releases every upstream chunk immediately (SSE); a positive
    /// value coalesces writes up to that interval.
    #[serde(with = "duration_str")]
    pub flush_interval: Duration,

    /// Grace period for in-flight requests after a shutdown signal.
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,

    pub debug: bool,

    /// Route upstream traffic through `HTTP_PROXY`/`HTTPS_PROXY` when set.
    pub respect_env_proxy: bool,

    pub log: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ":8080".to_string(),
            upstream_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(90),
            flush_interval: Duration::ZERO,
            shutdown_grace: Duration::from_secs(5),
            debug: false,
            respect_env_proxy: true,
            log: LogConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Socket address suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// `stderr` (also `-` or empty), `stdout`, or a file opened for append.
    pub path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            path: "stderr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory holding the blob store and the analytical database.
    pub path: PathBuf,
    /// Write one audit row per completed proxied request.
    pub audit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".memex"),
            audit: true,
        }
    }
}

/// Parse a humantime duration (`60s`, `1m 30s`); a bare `0` is zero.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{}': {}", s, e))
}

mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(de::Error::custom)
    }
}
