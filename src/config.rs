use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sdcp::SessionTiming;

pub const CONFIG_ENV: &str = "ELEGOO_CONFIG";
pub const HOST_ENV: &str = "ELEGOO_IP";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub printers: Vec<PrinterConfig>,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub settle_ms: u64,
    pub reconnect_interval_ms: u64,
    pub auto_connect: bool,
    pub log_dir: PathBuf,
    /// number of daily log files kept
    pub log_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            printers: vec![],
            poll_interval_ms: 1000,
            connect_timeout_ms: 5000,
            discovery_timeout_ms: 1000,
            settle_ms: 200,
            reconnect_interval_ms: 5000,
            auto_connect: true,
            log_dir: PathBuf::from("logs"),
            log_keep: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub name: String,
    pub host: String,
}

impl Config {
    /// Reads `$ELEGOO_CONFIG` or `config.yaml`, then applies `$ELEGOO_IP`.
    ///
    /// A missing file is not an error, the defaults are used instead.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = match std::fs::File::open(&path) {
            Ok(file) => serde_yaml::from_reader(file)
                .with_context(|| format!("failed to parse config file {}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("config file {} not found, using defaults", path);
                Config::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open config file {}", path));
            }
        };

        if let Ok(host) = std::env::var(HOST_ENV) {
            config.override_host(&host);
        }

        debug!("config = {:#?}", config);
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("failed to parse config")
    }

    /// Points the first printer at `host`, adding one if none is configured
    pub fn override_host(&mut self, host: &str) {
        let host = host.trim();
        if host.is_empty() {
            return;
        }
        match self.printers.first_mut() {
            Some(printer) => printer.host = host.to_string(),
            None => self.printers.push(PrinterConfig {
                name: "printer".to_string(),
                host: host.to_string(),
            }),
        }
    }

    pub fn get_printer(&self, name: &str) -> Option<&PrinterConfig> {
        self.printers.iter().find(|p| p.name == name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_ms),
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            ..SessionTiming::default()
        }
    }
}
