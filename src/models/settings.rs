//! Runtime settings for the exporter.
//!
//! Settings are read from TOML and tune the catalog client, the worker pool
//! sizes and the time budget. They are independent from the exporter document,
//! which describes *what* to export.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Catalog API behavior
    #[serde(default)]
    pub catalog: CatalogSettings,

    /// Worker pool sizes
    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    /// Time budget handling
    #[serde(default)]
    pub budget: BudgetSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load settings or return defaults if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!(
                path = ?path.as_ref(),
                error = %e,
                "Settings load failed, using defaults"
            );
            Self::default()
        })
    }

    /// Override values from environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("PORT_API_URL") {
            if !url.trim().is_empty() {
                self.catalog.api_url = url;
            }
        }
        override_from_env("CATALOG_TIMEOUT_SECS", &mut self.catalog.timeout_secs);
        override_from_env(
            "DESCRIBE_WORKERS",
            &mut self.concurrency.describe_workers,
        );
        override_from_env(
            "CLOUDCONTROL_WORKERS",
            &mut self.concurrency.cloudcontrol_workers,
        );
        override_from_env("CATALOG_WORKERS", &mut self.concurrency.catalog_workers);
        override_from_env("DELETE_WORKERS", &mut self.concurrency.delete_workers);
        override_from_env(
            "REINVOKE_THRESHOLD_SECS",
            &mut self.budget.reinvoke_threshold_secs,
        );
    }

    /// Validate settings values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.api_url.trim().is_empty() {
            return Err(AppError::validation("catalog.api_url is empty"));
        }
        url::Url::parse(&self.catalog.api_url)?;
        if self.catalog.exporter_name.trim().is_empty() {
            return Err(AppError::validation("catalog.exporter_name is empty"));
        }
        if self.catalog.timeout_secs == 0 {
            return Err(AppError::validation("catalog.timeout_secs must be > 0"));
        }
        let pools = [
            ("describe_workers", self.concurrency.describe_workers),
            ("cloudcontrol_workers", self.concurrency.cloudcontrol_workers),
            ("catalog_workers", self.concurrency.catalog_workers),
            ("delete_workers", self.concurrency.delete_workers),
        ];
        for (name, size) in pools {
            if size == 0 {
                return Err(AppError::validation(format!(
                    "concurrency.{name} must be > 0"
                )));
            }
        }
        Ok(())
    }

    /// Remaining time under which a run checkpoints instead of continuing.
    pub fn low_water(&self) -> Duration {
        Duration::from_secs(self.budget.reinvoke_threshold_secs)
    }
}

fn override_from_env<T: FromStr>(name: &str, target: &mut T) {
    let Ok(raw) = env::var(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(variable = name, value = %raw, "Ignoring invalid override"),
    }
}

/// Catalog API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    /// Base URL of the catalog API
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// Name stamped into the datasource of every written entity
    #[serde(default = "defaults::exporter_name")]
    pub exporter_name: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            exporter_name: defaults::exporter_name(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Bounded worker pool sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Detail fetches per page for most sources
    #[serde(default = "defaults::describe_workers")]
    pub describe_workers: usize,

    /// Detail fetches per page for Cloud Control, which throttles harder
    #[serde(default = "defaults::cloudcontrol_workers")]
    pub cloudcontrol_workers: usize,

    /// Concurrent entity writes within one dependency batch
    #[serde(default = "defaults::catalog_workers")]
    pub catalog_workers: usize,

    /// Concurrent stale entity deletions
    #[serde(default = "defaults::delete_workers")]
    pub delete_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            describe_workers: defaults::describe_workers(),
            cloudcontrol_workers: defaults::cloudcontrol_workers(),
            catalog_workers: defaults::catalog_workers(),
            delete_workers: defaults::delete_workers(),
        }
    }
}

/// Time budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Checkpoint once fewer than this many seconds remain
    #[serde(default = "defaults::reinvoke_threshold")]
    pub reinvoke_threshold_secs: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            reinvoke_threshold_secs: defaults::reinvoke_threshold(),
        }
    }
}

mod defaults {
    // Catalog defaults
    pub fn api_url() -> String {
        "https://api.getport.io/v1".into()
    }
    pub fn exporter_name() -> String {
        "port-aws-exporter".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Concurrency defaults
    pub fn describe_workers() -> usize {
        5
    }
    pub fn cloudcontrol_workers() -> usize {
        2
    }
    pub fn catalog_workers() -> usize {
        5
    }
    pub fn delete_workers() -> usize {
        5
    }

    // Budget defaults
    pub fn reinvoke_threshold() -> u64 {
        7 * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_settings_ok() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.low_water(), Duration::from_secs(420));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut settings = Settings::default();
        settings.concurrency.catalog_workers = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("catalog_workers"));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut settings = Settings::default();
        settings.catalog.api_url = "not a url".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [concurrency]
            describe_workers = 10
            "#,
        )
        .unwrap();
        assert_eq!(settings.concurrency.describe_workers, 10);
        assert_eq!(settings.concurrency.cloudcontrol_workers, 2);
        assert_eq!(settings.catalog.exporter_name, "port-aws-exporter");
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let settings = Settings::load_or_default("/nonexistent/settings.toml");
        assert_eq!(settings.budget.reinvoke_threshold_secs, 420);
    }
}
