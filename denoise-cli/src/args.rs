//! Command-line argument definitions for denoise-conv.

use clap::{ArgAction, Parser, ValueEnum};
use denoise_core::PostOp;
use std::path::PathBuf;

/// Run one fused 3x3 convolution layer on synthetic data.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct ConvArgs {
    /// Input channels (multiple of 16).
    #[arg(short = 'c', long, default_value_t = 16)]
    pub channels: usize,

    /// Output channels (multiple of 16); defaults to `--channels`.
    #[arg(short = 'o', long)]
    pub out_channels: Option<usize>,

    /// Image height in pixels.
    #[arg(long, default_value_t = 64)]
    pub height: usize,

    /// Image width in pixels.
    #[arg(long, default_value_t = 64)]
    pub width: usize,

    /// Epilogue fused after bias and ReLU.
    #[arg(long, value_enum, default_value_t = PostOpArg::None)]
    pub post_op: PostOpArg,

    /// Worker threads (0 = one per logical CPU). Overrides the settings file.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Number of timed submissions.
    #[arg(long, default_value_t = 1)]
    pub iterations: usize,

    /// Optional settings JSON. Defaults to `config/denoise_settings.json` when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Compare the output with the scalar reference and fail on mismatch.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verify: bool,

    /// Write the run report to a JSON file instead of stdout.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Dump the destination tensor (blocked layout, little-endian f16) to a file.
    #[arg(long, value_name = "PATH")]
    pub dump_raw: Option<PathBuf>,

    /// Disable the even-item-count padding of the work grid.
    #[arg(long = "no-eu-fusion", action = ArgAction::SetTrue)]
    pub no_eu_fusion: bool,

    /// Upper bound on work-items per group (power of two).
    #[arg(long)]
    pub max_group_items: Option<usize>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,
}

impl ConvArgs {
    pub fn out_channels(&self) -> usize {
        self.out_channels.unwrap_or(self.channels)
    }
}

/// Post-op selector as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PostOpArg {
    None,
    Pool,
    Upsample,
}

impl From<PostOpArg> for PostOp {
    fn from(value: PostOpArg) -> Self {
        match value {
            PostOpArg::None => PostOp::None,
            PostOpArg::Pool => PostOp::Pool,
            PostOpArg::Upsample => PostOp::Upsample,
        }
    }
}
