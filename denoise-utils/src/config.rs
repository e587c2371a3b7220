//! Shared configuration types consumed across the denoise workspace.
//!
//! Settings are persisted as JSON. Every section uses `#[serde(default)]` so a
//! partial file only overrides the keys it names.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Execution engine preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Worker threads for the CPU engine (0 = one per logical CPU).
    pub num_threads: usize,
}

/// Work-group sizing knobs for the convolution dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TilingSettings {
    /// Pad an all-odd tile grid so the item count becomes even.
    pub eu_fusion: bool,
    /// Upper bound on work-items per work-group.
    pub max_group_items: usize,
}

impl Default for TilingSettings {
    fn default() -> Self {
        Self {
            eu_fusion: true,
            max_group_items: 16,
        }
    }
}

/// Timing telemetry preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Threshold for telemetry output (off, error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string; unknown values map to `Debug`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }

    /// Push these settings into the global telemetry switch.
    pub fn apply(&self) {
        crate::telemetry::configure(self.enabled, self.level_filter());
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub tiling: TilingSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to disk as pretty-printed JSON, overwriting the file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let limit = self.tiling.max_group_items;
        anyhow::ensure!(
            limit.is_power_of_two(),
            "tiling.max_group_items must be a power of two (got {limit})"
        );
        Ok(())
    }
}

/// Default location of the settings file (`config/denoise_settings.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/denoise_settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/denoise_settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "engine": { "num_threads": 4 } }"#).expect("parse");
        assert_eq!(settings.engine.num_threads, 4);
        assert_eq!(settings.tiling, TilingSettings::default());
        assert!(!settings.telemetry.enabled);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/settings.json");
        let mut settings = Settings::default();
        settings.tiling.eu_fusion = false;
        settings.telemetry.enabled = true;
        settings.telemetry.level = "info".into();

        settings.save_to_path(&path).expect("save");
        let loaded = Settings::load_from_path(&path).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.telemetry.level, "info");
    }

    #[test]
    fn rejects_non_power_of_two_group_limit() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "tiling": { "max_group_items": 12 } }"#).expect("write");
        let err = Settings::load_from_path(&path).expect_err("invalid limit");
        assert!(err.to_string().contains("power of two"), "{err}");
    }

    #[test]
    fn telemetry_level_parsing() {
        let telemetry = TelemetrySettings {
            level: "WARNING".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);

        let telemetry = TelemetrySettings {
            level: "bogus".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Debug);
    }
}
