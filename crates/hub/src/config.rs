//! TOML config file loading and validation: scheduler cadence, the two
//! external sources, and the zones the registry starts with.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::http::ReadingEndpoint;
use crate::model::SoilType;
use crate::zone::{IrrigationZone, ZoneMode};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reading_source: ReadingSourceConfig,
    #[serde(default)]
    pub prediction_source: PredictionSourceConfig,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub refresh_interval_sec: u64,
    pub fetch_timeout_sec: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_sec: 100,
            fetch_timeout_sec: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_sec)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReadingSourceConfig {
    Http {
        url: String,
        #[serde(default)]
        endpoint: ReadingEndpoint,
    },
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_client_id")]
        client_id: String,
        #[serde(default = "default_stale_timeout")]
        stale_timeout_sec: u64,
    },
    Sim,
}

impl Default for ReadingSourceConfig {
    fn default() -> Self {
        Self::Http {
            url: DEFAULT_SOURCE_URL.to_string(),
            endpoint: ReadingEndpoint::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PredictionSourceConfig {
    Http { url: String },
    Sim,
}

impl Default for PredictionSourceConfig {
    fn default() -> Self {
        Self::Http {
            url: DEFAULT_SOURCE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub name: String,
    pub soil_type: SoilType,
    #[serde(default = "default_moisture")]
    pub moisture: f64,
    #[serde(default = "default_optimal")]
    pub optimal_moisture: f64,
    #[serde(default = "default_mode")]
    pub mode: ZoneMode,
}

const DEFAULT_SOURCE_URL: &str = "http://127.0.0.1:5000/api";

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "agro-hub".to_string()
}

fn default_stale_timeout() -> u64 {
    600
}

fn default_moisture() -> f64 {
    45.0
}

fn default_optimal() -> f64 {
    60.0
}

fn default_mode() -> ZoneMode {
    ZoneMode::Auto
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_scheduler(&mut errors);
        self.validate_sources(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_scheduler(&self, errors: &mut Vec<String>) {
        if self.scheduler.refresh_interval_sec == 0 {
            errors.push("scheduler: refresh_interval_sec must be positive".to_string());
        }
        if self.scheduler.fetch_timeout_sec == 0 {
            errors.push("scheduler: fetch_timeout_sec must be positive".to_string());
        }
    }

    fn validate_sources(&self, errors: &mut Vec<String>) {
        match &self.reading_source {
            ReadingSourceConfig::Http { url, .. } => check_url("reading_source", url, errors),
            ReadingSourceConfig::Mqtt {
                host,
                port,
                client_id,
                stale_timeout_sec,
            } => {
                if host.trim().is_empty() {
                    errors.push("reading_source: host is empty".to_string());
                }
                if *port == 0 {
                    errors.push("reading_source: port must be non-zero".to_string());
                }
                if client_id.trim().is_empty() {
                    errors.push("reading_source: client_id is empty".to_string());
                }
                if *stale_timeout_sec == 0 {
                    errors.push("reading_source: stale_timeout_sec must be positive".to_string());
                }
            }
            ReadingSourceConfig::Sim => {}
        }

        if let PredictionSourceConfig::Http { url } = &self.prediction_source {
            check_url("prediction_source", url, errors);
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{}: duplicate zone_id", ctx()));
            }

            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            // ── Moisture bounds ─────────────────────────────────
            if !(0.0..=100.0).contains(&z.moisture) {
                errors.push(format!(
                    "{}: moisture {} out of range [0, 100]",
                    ctx(),
                    z.moisture
                ));
            }
            if !(0.0..=100.0).contains(&z.optimal_moisture) {
                errors.push(format!(
                    "{}: optimal_moisture {} out of range [0, 100]",
                    ctx(),
                    z.optimal_moisture
                ));
            }
        }
    }

    /// Initial zone entities, in file order.
    pub fn build_zones(&self) -> Vec<IrrigationZone> {
        self.zones
            .iter()
            .map(|z| {
                IrrigationZone::new(
                    &z.zone_id,
                    &z.name,
                    z.soil_type,
                    z.moisture,
                    z.optimal_moisture,
                    z.mode,
                )
            })
            .collect()
    }
}

fn check_url(section: &str, url: &str, errors: &mut Vec<String>) {
    if url.trim().is_empty() {
        errors.push(format!("{section}: url is empty"));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(format!(
            "{section}: url '{url}' must start with http:// or https://"
        ));
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    if config.zones.is_empty() {
        tracing::warn!(%path, "no zones configured");
    }
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
