use crate::config::{LogConfig, LogFormat};
use anyhow::{Context, Result};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use uuid::Uuid;

/// Installs the global subscriber described by `config`. `RUST_LOG` takes
/// precedence over `log.level`.
pub fn init(config: &LogConfig) -> Result<()> {
    let directive = config
        .filter_directive()
        .with_context(|| format!("Unknown log.level: {}", config.level))?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .context("Invalid log filter")?;

    let (writer, ansi) = match config.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .with_file(config.set_report_caller)
        .with_line_number(config.set_report_caller);

    let layer = match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

/// Stderr logging used when the configuration itself could not be loaded.
pub fn init_fallback() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub struct AccessLogger {
    file: Option<Arc<Mutex<std::fs::File>>>,
    format: AccessLogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLogFormat {
    Json,
    CommonLog,
    Combined,
}

impl AccessLogFormat {
    pub fn from_name(name: &str) -> Self {
        match name {
            "json" => AccessLogFormat::Json,
            "common" => AccessLogFormat::CommonLog,
            _ => AccessLogFormat::Combined,
        }
    }
}

#[derive(Debug)]
pub struct LogEntry {
    pub request_id: Uuid,
    pub remote_addr: String,
    pub method: String,
    pub uri: String,
    pub status: u16,
    /// Declared `Content-Length` of the response, 0 for streamed bodies
    /// without one. Bytes actually sent are not counted.
    pub response_size: usize,
    /// Time until the response head was ready.
    pub duration_ms: f64,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AccessLogger {
    pub fn new(log_path: Option<&str>, format: AccessLogFormat) -> Result<Self> {
        let file = if let Some(path) = log_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open access log: {}", path))?;
            Some(Arc::new(Mutex::new(file)))
        } else {
            None
        };

        Ok(Self { file, format })
    }

    pub fn from_config(config: &LogConfig) -> Result<Option<Self>> {
        match config.access_log {
            Some(ref path) => Ok(Some(Self::new(
                Some(path),
                AccessLogFormat::from_name(&config.access_log_format),
            )?)),
            None => Ok(None),
        }
    }

    pub async fn log(&self, entry: LogEntry) {
        let log_line = self.format_entry(&entry);

        if let Some(ref file) = self.file {
            let mut file_guard = file.lock().await;
            if let Err(e) = writeln!(file_guard, "{}", log_line) {
                error!("Failed to write access log: {}", e);
            }
            if let Err(e) = file_guard.flush() {
                error!("Failed to flush access log: {}", e);
            }
        } else {
            println!("{}", log_line);
        }
    }

    pub fn format_entry(&self, entry: &LogEntry) -> String {
        match self.format {
            AccessLogFormat::Json => json!({
                "timestamp": entry.timestamp.to_rfc3339(),
                "request_id": entry.request_id.to_string(),
                "remote_addr": entry.remote_addr,
                "method": entry.method,
                "uri": entry.uri,
                "status": entry.status,
                "response_size": entry.response_size,
                "duration_ms": entry.duration_ms,
                "user_agent": entry.user_agent,
                "referer": entry.referer
            })
            .to_string(),
            AccessLogFormat::CommonLog => {
                format!(
                    "{} - - [{}] \"{} {} HTTP/1.1\" {} {}",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.status,
                    entry.response_size
                )
            }
            AccessLogFormat::Combined => {
                format!(
                    "{} - - [{}] \"{} {} HTTP/1.1\" {} {} \"{}\" \"{}\"",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.status,
                    entry.response_size,
                    entry.referer.as_deref().unwrap_or("-"),
                    entry.user_agent.as_deref().unwrap_or("-")
                )
            }
        }
    }
}
