//! Configuration loading and CLI override logic.

use std::path::PathBuf;

use anyhow::{Context, Result};
use denoise_utils::{Settings, config::default_settings_path, normalize_path};
use log::info;

use crate::args::ConvArgs;

/// Load settings from a file or use defaults.
pub fn load_settings(config_path: Option<&PathBuf>) -> Result<Settings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        let settings = Settings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = Settings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }
}

/// Apply command-line arguments on top of loaded or default settings.
pub fn apply_cli_overrides(settings: &mut Settings, args: &ConvArgs) -> Result<()> {
    if let Some(threads) = args.threads {
        settings.engine.num_threads = threads;
    }
    if args.no_eu_fusion {
        settings.tiling.eu_fusion = false;
    }
    if let Some(limit) = args.max_group_items {
        settings.tiling.max_group_items = limit;
    }

    if args.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = args.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }

    settings.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn overrides_replace_settings() {
        let args = ConvArgs::parse_from([
            "denoise-conv",
            "--threads",
            "3",
            "--no-eu-fusion",
            "--max-group-items",
            "8",
            "--telemetry-level",
            "OFF",
        ]);
        let mut settings = Settings::default();
        settings.telemetry.enabled = true;
        apply_cli_overrides(&mut settings, &args).expect("overrides");

        assert_eq!(settings.engine.num_threads, 3);
        assert!(!settings.tiling.eu_fusion);
        assert_eq!(settings.tiling.max_group_items, 8);
        assert_eq!(settings.telemetry.level, "off");
        assert!(!settings.telemetry.enabled);
    }

    #[test]
    fn invalid_group_limit_is_rejected() {
        let args = ConvArgs::parse_from(["denoise-conv", "--max-group-items", "6"]);
        let mut settings = Settings::default();
        let err = apply_cli_overrides(&mut settings, &args).expect_err("not a power of two");
        assert!(err.to_string().contains("power of two"));
    }
}
