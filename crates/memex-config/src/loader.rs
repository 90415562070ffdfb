use crate::schema::{parse_duration, MemexConfig};
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "yml" | "yaml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

const CONFIG_CANDIDATES: &[&str] = &[
    "memex.yml",
    ".memex.yml",
    ".config/memex.yml",
    "memex.yaml",
    ".memex.yaml",
    ".config/memex.yaml",
    "memex.toml",
    ".memex.toml",
    ".config/memex.toml",
];

/// Load configuration: defaults, then a config file, then `MEMEX_*` variables.
///
/// `explicit` wins over file discovery under `base_dir`. `getenv` is injected
/// so callers (and tests) control which environment is consulted.
pub fn load_config<F>(base_dir: &Path, explicit: Option<&Path>, getenv: F) -> Result<MemexConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| find_config_file(base_dir));

    let mut config = match path {
        Some(path) => load_config_from_file(&path)?,
        None => MemexConfig::default(),
    };

    apply_env_overrides(&mut config, getenv)?;
    Ok(config)
}

pub fn load_config_from_file(path: &Path) -> Result<MemexConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unknown config format for: {}", path.display()))?;

    parse_config_content(&content, format)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

fn parse_config_content(content: &str, format: ConfigFormat) -> Result<MemexConfig> {
    if content.trim().is_empty() {
        return Ok(MemexConfig::default());
    }
    match format {
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).context("Failed to parse YAML"),
        ConfigFormat::Toml => toml::from_str(content).context("Failed to parse TOML"),
    }
}

/// First existing candidate under `base_dir`, in priority order.
pub fn find_config_file(base_dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|candidate| base_dir.join(candidate))
        .find(|path| path.is_file())
}

fn apply_env_overrides<F>(config: &mut MemexConfig, getenv: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| getenv(name).filter(|v| !v.is_empty());
    let proxy = &mut config.proxy;

    if let Some(v) = var("MEMEX_PROXY_LISTEN") {
        proxy.listen = v;
    }
    if let Some(v) = var("MEMEX_PROXY_UPSTREAM_TIMEOUT") {
        proxy.upstream_timeout = env_duration("MEMEX_PROXY_UPSTREAM_TIMEOUT", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_IDLE_TIMEOUT") {
        proxy.idle_timeout = env_duration("MEMEX_PROXY_IDLE_TIMEOUT", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_FLUSH_INTERVAL") {
        proxy.flush_interval = env_duration("MEMEX_PROXY_FLUSH_INTERVAL", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_SHUTDOWN_GRACE") {
        proxy.shutdown_grace = env_duration("MEMEX_PROXY_SHUTDOWN_GRACE", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_DEBUG") {
        proxy.debug = env_bool("MEMEX_PROXY_DEBUG", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_RESPECT_ENV_PROXY") {
        proxy.respect_env_proxy = env_bool("MEMEX_PROXY_RESPECT_ENV_PROXY", &v)?;
    }
    if let Some(v) = var("MEMEX_PROXY_LOG_LEVEL") {
        proxy.log.level = v;
    }
    if let Some(v) = var("MEMEX_PROXY_LOG_FORMAT") {
        proxy.log.format = v
            .parse()
            .map_err(|e| anyhow!("MEMEX_PROXY_LOG_FORMAT: {}", e))?;
    }
    if let Some(v) = var("MEMEX_PROXY_LOG_PATH") {
        proxy.log.path = v;
    }
    if let Some(v) = var("MEMEX_STORE_PATH") {
        config.store.path = PathBuf::from(v);
    }
    if let Some(v) = var("MEMEX_STORE_AUDIT") {
        config.store.audit = env_bool("MEMEX_STORE_AUDIT", &v)?;
    }

    Ok(())
}

fn env_duration(name: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| anyhow!("{}: {}", name, e))
}

fn env_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{}: expected a boolean, got '{}'", name, value),
    }
}
