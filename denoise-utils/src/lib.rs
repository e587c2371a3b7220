//! Common helpers shared across the denoise crates.

/// Persistent settings for the engine, tiling heuristics and telemetry.
pub mod config;
/// CPU execution engine that runs work-group kernels on a thread pool.
pub mod engine;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

pub use config::{EngineSettings, Settings, TelemetrySettings, TilingSettings};
pub use engine::{
    CpuArch, CpuDevice, CpuEngine, EngineError, EngineOptions, WorkDim, WorkGroupItem,
};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, telemetry_allows, telemetry_enabled,
    telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once for binaries, benches and tests.
///
/// `RUST_LOG` takes precedence when set; otherwise `default_filter` applies.
/// Telemetry records are always let through so that [`configure_telemetry`]
/// alone decides whether timings are printed.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // A logger is already installed (common in tests).
    }
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<std::path::PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}
