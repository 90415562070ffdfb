use anyhow::{Context, Result};
use memex_config::{LogConfig, LogFormat};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    Stdout,
    File(PathBuf),
}

impl LogSink {
    pub fn from_path(path: &str) -> Self {
        match path.trim() {
            "" | "-" | "stderr" => Self::Stderr,
            "stdout" => Self::Stdout,
            other => Self::File(PathBuf::from(other)),
        }
    }

    fn make_writer(&self) -> Result<BoxMakeWriter> {
        Ok(match self {
            Self::Stderr => BoxMakeWriter::new(std::io::stderr),
            Self::Stdout => BoxMakeWriter::new(std::io::stdout),
            Self::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path.display()))?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        })
    }
}

/// Map a configured level to a filter directive. Unknown levels fall back to `info`.
pub fn level_directive(level: &str, debug: bool) -> &'static str {
    if debug {
        return "debug";
    }
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the config.
pub fn init_subscriber(config: &LogConfig, debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level, debug)));
    let writer = LogSink::from_path(&config.path).make_writer()?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}
