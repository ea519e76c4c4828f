use crate::proxy::ProxyTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;


pub const DEFAULT_CONFIG_PATH: &str = "/etc/adminui/adminui.toml";

/// Settings loaded once at startup. Shared behind an `Arc` and never mutated.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webconfigadmin: UpstreamConfig,
    pub routes: RoutesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub web_root: String,
    pub index_files: Vec<String>,
    pub tcp_nodelay: bool,
    /// Seconds to wait for in-flight connections after a shutdown signal.
    pub shutdown_timeout: u64,
}

/// The configuration-management service requests are forwarded to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub host: String,
    /// Milliseconds; 0 leaves the transport default in place.
    pub connect_timeout: u64,
    /// Milliseconds allowed for the upstream response head; 0 waits forever.
    pub response_timeout: u64,
    /// Seconds an idle pooled connection is kept.
    pub pool_idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub static_files: String,
    pub proxy: String,
    pub healthz: String,
    pub version: String,
    pub monitor: String,
    pub metrics: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<String>,
    pub set_report_caller: bool,
    pub format: LogFormat,
    pub access_log: Option<String>,
    pub access_log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            web_root: "/usr/share/adminui/webroot".to_string(),
            index_files: vec!["index.html".to_string()],
            tcp_nodelay: true,
            shutdown_timeout: 10,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:9000".to_string(),
            connect_timeout: 5000,
            response_timeout: 60000,
            pool_idle_timeout: 90,
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            static_files: "/".to_string(),
            proxy: "/provider".to_string(),
            healthz: "/healthz".to_string(),
            version: "/version".to_string(),
            monitor: "/monitor".to_string(),
            metrics: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            set_report_caller: false,
            format: LogFormat::Text,
            access_log: None,
            access_log_format: "combined".to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connect_timeout)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.response_timeout)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl RoutesConfig {
    /// Every configured prefix paired with the key it came from.
    pub fn prefixes(&self) -> Vec<(&'static str, &str)> {
        let mut prefixes = vec![
            ("routes.static_files", self.static_files.as_str()),
            ("routes.proxy", self.proxy.as_str()),
            ("routes.healthz", self.healthz.as_str()),
            ("routes.version", self.version.as_str()),
            ("routes.monitor", self.monitor.as_str()),
        ];
        if let Some(ref metrics) = self.metrics {
            prefixes.push(("routes.metrics", metrics.as_str()));
        }
        prefixes
    }
}

impl LogConfig {
    /// Maps the level names accepted in the config file onto tracing levels.
    pub fn filter_directive(&self) -> Option<&'static str> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" | "warning" => Some("warn"),
            "error" | "fatal" | "panic" => Some("error"),
            _ => None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_address()?;

        if self.server.web_root.trim().is_empty() {
            return Err(anyhow::anyhow!("server.web_root must not be empty"));
        }

        if self.server.index_files.is_empty() {
            return Err(anyhow::anyhow!("server.index_files must not be empty"));
        }

        if self.webconfigadmin.host.trim().is_empty() {
            return Err(anyhow::anyhow!("webconfigadmin.host must not be empty"));
        }
        ProxyTarget::parse(&self.webconfigadmin.host).context("webconfigadmin.host")?;

        let mut seen = HashSet::new();
        for (key, prefix) in self.routes.prefixes() {
            if !prefix.starts_with('/') {
                return Err(anyhow::anyhow!(
                    "{} must be a path starting with '/', got {:?}",
                    key,
                    prefix
                ));
            }
            if !seen.insert(prefix) {
                return Err(anyhow::anyhow!(
                    "{} duplicates another route prefix: {}",
                    key,
                    prefix
                ));
            }
        }

        if self.log.filter_directive().is_none() {
            return Err(anyhow::anyhow!("Unknown log.level: {}", self.log.level));
        }

        if !matches!(
            self.log.access_log_format.as_str(),
            "json" | "common" | "combined"
        ) {
            return Err(anyhow::anyhow!(
                "Unknown log.access_log_format: {}",
                self.log.access_log_format
            ));
        }

        Ok(())
    }

    pub fn listen_address(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .with_context(|| format!("Invalid listen address: {}", addr))
    }
}
