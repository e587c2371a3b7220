//! Scoped timing records for kernel submissions and CLI runs.
//!
//! A [`TimingGuard`] measures the time between its creation and its drop and
//! emits a single record on the [`TELEMETRY_TARGET`] log target. Guards are
//! inert unless telemetry was switched on through [`configure`] and the
//! requested level passes both the telemetry threshold and the logger filter,
//! so leaving them in hot paths costs one atomic load.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used for all telemetry records.
pub const TELEMETRY_TARGET: &str = "denoise::telemetry";

const ENABLED_BIT: u8 = 0x80;
const LEVEL_MASK: u8 = 0x07;

// Enabled flag in the high bit, level threshold (0 = off .. 5 = trace) below.
static TELEMETRY_STATE: AtomicU8 = AtomicU8::new(0);

/// RAII helper that logs how long a scope took when dropped.
#[derive(Debug)]
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    fn start(label: Cow<'static, str>, level: Level, active: bool) -> Self {
        Self {
            label,
            level,
            start: Instant::now(),
            active,
        }
    }

    /// Returns `true` when the guard will emit a record on drop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time elapsed since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the guard without logging and return the elapsed time.
    pub fn finish(mut self) -> Duration {
        self.active = false;
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        log!(
            target: TELEMETRY_TARGET,
            self.level,
            "{} completed in {:.2?}",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Timing guard that activates whenever telemetry allows `level`.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    timing_guard_if(label, level, true)
}

/// Timing guard gated by an additional caller-provided flag.
pub fn timing_guard_if(
    label: impl Into<Cow<'static, str>>,
    level: Level,
    enabled: bool,
) -> TimingGuard {
    let active =
        enabled && telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard::start(label.into(), level, active)
}

/// Update the global telemetry switch and threshold.
pub fn configure(enabled: bool, level: LevelFilter) {
    let mut state = filter_to_bits(level);
    if enabled {
        state |= ENABLED_BIT;
    }
    TELEMETRY_STATE.store(state, Ordering::Relaxed);
}

/// Returns whether telemetry is switched on.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_STATE.load(Ordering::Relaxed) & ENABLED_BIT != 0
}

/// Returns the configured telemetry threshold.
pub fn telemetry_level() -> LevelFilter {
    bits_to_filter(TELEMETRY_STATE.load(Ordering::Relaxed) & LEVEL_MASK)
}

/// Returns `true` when telemetry is on and `level` is within the threshold.
pub fn telemetry_allows(level: Level) -> bool {
    let state = TELEMETRY_STATE.load(Ordering::Relaxed);
    state & ENABLED_BIT != 0 && level.to_level_filter() <= bits_to_filter(state & LEVEL_MASK)
}

fn filter_to_bits(filter: LevelFilter) -> u8 {
    match filter {
        LevelFilter::Off => 0,
        LevelFilter::Error => 1,
        LevelFilter::Warn => 2,
        LevelFilter::Info => 3,
        LevelFilter::Debug => 4,
        LevelFilter::Trace => 5,
    }
}

fn bits_to_filter(bits: u8) -> LevelFilter {
    match bits {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bits_roundtrip() {
        for filter in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ] {
            assert_eq!(bits_to_filter(filter_to_bits(filter)), filter);
        }
    }

    // Single test touching the global state to avoid races between tests.
    #[test]
    fn configure_controls_threshold() {
        configure(true, LevelFilter::Info);
        assert!(telemetry_enabled());
        assert_eq!(telemetry_level(), LevelFilter::Info);
        assert!(telemetry_allows(Level::Warn));
        assert!(telemetry_allows(Level::Info));
        assert!(!telemetry_allows(Level::Debug));

        configure(false, LevelFilter::Trace);
        assert!(!telemetry_enabled());
        assert!(!telemetry_allows(Level::Error));

        let guard = timing_guard("disabled scope", Level::Info);
        assert!(!guard.is_active());
        let _ = guard.finish();
    }
}
