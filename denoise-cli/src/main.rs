mod args;
mod config;
mod run;

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use denoise_core::TilingConfig;
use denoise_utils::{CpuDevice, init_logging, timing_guard};
use log::{Level, info, warn};

use crate::args::ConvArgs;
use crate::config::{apply_cli_overrides, load_settings};
use crate::run::{LayerShape, run_layer};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = ConvArgs::parse();

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args)?;
    settings.telemetry.apply();
    let _total = timing_guard("denoise-conv", Level::Info);

    let mut device = CpuDevice::new();
    let threads = i64::try_from(settings.engine.num_threads).context("thread count too large")?;
    device.set_int("numThreads", threads)?;
    let engine = device.commit()?;
    info!(
        "Using {} (denoise-core {})",
        engine.name(),
        denoise_core::version()
    );

    let shape = LayerShape {
        in_channels: args.channels,
        out_channels: args.out_channels(),
        height: args.height,
        width: args.width,
        post_op: args.post_op.into(),
    };
    let tiling = TilingConfig::from(&settings.tiling);
    let outcome = run_layer(&engine, &shape, tiling, args.iterations, args.verify)?;

    if let Some(path) = args.dump_raw.as_ref() {
        create_parent_dir(path)?;
        fs::write(path, outcome.dst.to_bytes())
            .with_context(|| format!("failed to write raw output to {}", path.display()))?;
        info!(
            "Wrote {} bytes of f16 output to {}",
            outcome.dst.desc().byte_size(),
            path.display()
        );
    }

    let report = &outcome.report;
    if let Some(json_path) = args.json.as_ref() {
        create_parent_dir(json_path)?;
        let file = File::create(json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(file, report)
            .with_context(|| format!("failed to write report JSON to {}", json_path.display()))?;
        info!("Wrote report to {}", json_path.display());
    } else {
        let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
        println!("{json}");
    }

    if let Some(verification) = report.verification.as_ref() {
        if !verification.passed {
            warn!(
                "{} element(s) differ from the reference (max abs error {})",
                verification.mismatches, verification.max_abs_error
            );
            anyhow::bail!("output does not match the reference implementation");
        }
        info!("Output matches the reference implementation");
    }

    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}
