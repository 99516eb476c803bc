//! Settings store
//!
//! One TOML file holds the alert thresholds, monitor definitions,
//! notification channel URLs, synthetics defaults and aggregator tuning.
//! A missing file falls back to defaults with a warning; a malformed file
//! is an error. Saving normalizes monitor definitions the same way the
//! scheduler does, so what is on disk is always what would run.

use crate::aggregator::AggregatorConfig;
use crate::alerts::Thresholds;
use crate::error::SettingsError;
use crate::synthetics::{Monitor, SyntheticsConfig};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// API keys attached to probe requests
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiKeys {
    pub production: String,
    pub development: String,
}

/// Outbound notification channel URLs; empty disables a channel
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertChannels {
    pub slack_webhook_url: String,
    pub webhook_url: String,
}

/// Global synthetics scheduling defaults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticsDefaults {
    /// Jitter fraction applied when a monitor has no override
    pub jitter_pct: f64,
    /// Window for the randomized first-run delay, in milliseconds
    pub spread_start_ms: u64,
}

impl Default for SyntheticsDefaults {
    fn default() -> Self {
        Self {
            jitter_pct: 0.2,
            spread_start_ms: 2000,
        }
    }
}

fn default_dedup_cooldown_secs() -> u64 {
    60
}

fn default_alert_check_interval_secs() -> u64 {
    60
}

/// The whole configuration blob
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub thresholds: Thresholds,
    pub api_keys: ApiKeys,
    pub monitors: Vec<Monitor>,
    pub alerts: AlertChannels,
    pub synthetics: SyntheticsDefaults,
    /// Endpoints whose 404 responses are neither logged nor alerted
    pub ignore_not_found: Vec<String>,
    pub dedup_cooldown_secs: u64,
    pub alert_check_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            api_keys: ApiKeys::default(),
            monitors: Vec::new(),
            alerts: AlertChannels::default(),
            synthetics: SyntheticsDefaults::default(),
            ignore_not_found: Vec::new(),
            dedup_cooldown_secs: default_dedup_cooldown_secs(),
            alert_check_interval_secs: default_alert_check_interval_secs(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// A missing file is not an error: defaults are returned with a
    /// warning. Unreadable or malformed files return `SettingsError`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            warn!(
                "settings file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::ReadError(format!("{}: {}", path.display(), e)))?;
        let settings: Settings = toml::from_str(&raw)?;
        Ok(settings)
    }

    /// Write normalized settings to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let normalized = self.normalized();
        normalized.thresholds.validate()?;
        let raw = toml::to_string_pretty(&normalized)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Copy with invalid monitors dropped and the rest sanitized
    pub fn normalized(&self) -> Self {
        let mut settings = self.clone();
        settings.monitors = settings
            .monitors
            .iter()
            .filter(|m| match m.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("dropping invalid monitor {:?}: {}", m.name, e);
                    false
                }
            })
            .map(|m| m.normalized())
            .collect();
        settings.synthetics.jitter_pct = settings.synthetics.jitter_pct.clamp(0.0, 0.9);
        settings
    }

    /// Aggregator tuning derived from these settings
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            dedup_cooldown: chrono::Duration::seconds(self.dedup_cooldown_secs as i64),
            ignore_not_found: self.ignore_not_found.clone(),
        }
    }

    /// Scheduler configuration derived from these settings
    pub fn synthetics_config(&self) -> SyntheticsConfig {
        let normalized = self.normalized();
        SyntheticsConfig {
            monitors: normalized.monitors,
            api_keys: normalized.api_keys,
            jitter_pct: normalized.synthetics.jitter_pct,
            spread_start_ms: normalized.synthetics.spread_start_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.api_keys.production = "prod-key".to_string();
        settings.alerts.slack_webhook_url = "https://hooks.example/slack".to_string();
        settings.monitors.push(Monitor {
            name: "checkout".to_string(),
            url: "https://example.com/health".to_string(),
            backoff: true,
            ..Monitor::default()
        });

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();

        assert_eq!(loaded.api_keys.production, "prod-key");
        assert_eq!(loaded.monitors.len(), 1);
        assert_eq!(loaded.monitors[0].name, "checkout");
        assert!(loaded.monitors[0].backoff);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "monitors = not valid toml [").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::TomlError(_))
        ));
    }

    #[test]
    fn test_parse_toml_snippet() {
        let raw = r#"
            dedup_cooldown_secs = 120
            ignore_not_found = ["/favicon.ico"]

            [thresholds]
            error_rate_pct = 2.5

            [[monitors]]
            name = "checkout"
            url = "https://example.com/health"
            interval_ms = 30000
            backoff = true
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();

        assert_eq!(settings.dedup_cooldown_secs, 120);
        assert_eq!(settings.ignore_not_found, vec!["/favicon.ico"]);
        assert_eq!(settings.thresholds.error_rate_pct, 2.5);
        // Unspecified thresholds keep their defaults
        assert_eq!(settings.thresholds.cpu_usage_pct, 80.0);
        assert_eq!(settings.monitors[0].interval_ms, 30_000);
    }

    #[test]
    fn test_normalized_drops_invalid_monitors() {
        let mut settings = Settings::default();
        settings.monitors.push(Monitor::default()); // empty url
        settings.monitors.push(Monitor {
            url: "https://example.com".to_string(),
            jitter_pct: Some(5.0),
            ..Monitor::default()
        });
        settings.synthetics.jitter_pct = 3.0;

        let normalized = settings.normalized();
        assert_eq!(normalized.monitors.len(), 1);
        assert_eq!(normalized.monitors[0].jitter_pct, Some(0.9));
        assert_eq!(normalized.synthetics.jitter_pct, 0.9);
    }

    #[test]
    fn test_derived_configs() {
        let mut settings = Settings::default();
        settings.dedup_cooldown_secs = 30;
        settings.ignore_not_found.push("/health".to_string());

        let aggregator_config = settings.aggregator_config();
        assert_eq!(
            aggregator_config.dedup_cooldown,
            chrono::Duration::seconds(30)
        );
        assert_eq!(aggregator_config.ignore_not_found, vec!["/health"]);

        let synthetics_config = settings.synthetics_config();
        assert!((synthetics_config.jitter_pct - 0.2).abs() < 1e-9);
        assert_eq!(synthetics_config.spread_start_ms, 2000);
    }
}
