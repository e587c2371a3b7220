//! Synthetic layer execution, timing and verification.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use denoise_core::{Conv, ConvDesc, PlanarTensor, PostOp, Tensor, TilingConfig, reference, reorder};
use denoise_utils::{CpuEngine, timing_guard};
use log::{Level, debug, info};
use serde::Serialize;

/// Inputs cycle through halves and weights through quarters so that the
/// half-precision result is exact and verification can demand equality.
const INPUT_VALUES: [f32; 5] = [-1.0, -0.5, 0.0, 0.5, 1.0];
const WEIGHT_VALUES: [f32; 5] = [-0.5, -0.25, 0.0, 0.25, 0.5];

/// Absolute tolerance, scaled by `max(1, |expected|)`.
const VERIFY_TOLERANCE: f32 = 1e-2;

/// Shape of the layer to run.
#[derive(Debug, Clone, Copy)]
pub struct LayerShape {
    pub in_channels: usize,
    pub out_channels: usize,
    pub height: usize,
    pub width: usize,
    pub post_op: PostOp,
}

/// Synthetic operands in plain layout.
pub struct SyntheticLayer {
    pub src: PlanarTensor,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl SyntheticLayer {
    pub fn generate(shape: &LayerShape) -> Result<Self> {
        let src = PlanarTensor::from_fn(shape.in_channels, shape.height, shape.width, |c, h, w| {
            INPUT_VALUES[(c * 7 + h * 3 + w * 5) % INPUT_VALUES.len()]
        })?;
        let weights = (0..shape.out_channels * shape.in_channels * 9)
            .map(|i| WEIGHT_VALUES[(i * 13 + i / 9) % WEIGHT_VALUES.len()])
            .collect();
        let bias = (0..shape.out_channels)
            .map(|o| (o % 9) as f32 / 8.0 - 0.5)
            .collect();
        Ok(Self {
            src,
            weights,
            bias,
        })
    }

    /// Expected output of the fused layer.
    pub fn reference(&self, post_op: PostOp) -> Result<PlanarTensor> {
        let conv = reference::conv3x3_relu(&self.src, &self.weights, &self.bias)?;
        Ok(match post_op {
            PostOp::None => conv,
            PostOp::Pool => reference::max_pool2x2(&conv)?,
            PostOp::Upsample => reference::upsample2x(&conv)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct Verification {
    pub max_abs_error: f32,
    pub mismatches: usize,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct TimingSummary {
    pub iterations: usize,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub engine: String,
    pub arch: String,
    pub threads: usize,
    pub post_op: PostOp,
    pub src: Vec<usize>,
    pub dst: Vec<usize>,
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub groups: [usize; 3],
    pub eu_fusion: bool,
    pub timing: TimingSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
}

/// Output of [`run_layer`].
pub struct LayerRun {
    pub report: RunReport,
    pub dst: Tensor,
}

pub fn run_layer(
    engine: &Arc<CpuEngine>,
    shape: &LayerShape,
    tiling: TilingConfig,
    iterations: usize,
    verify: bool,
) -> Result<LayerRun> {
    anyhow::ensure!(iterations > 0, "--iterations must be at least 1");

    let desc = ConvDesc::new(
        shape.in_channels,
        shape.out_channels,
        shape.height,
        shape.width,
        shape.post_op,
    )
    .context("invalid layer shape")?;
    let mut conv = Conv::new(Arc::clone(engine), desc)?.with_tiling(tiling);

    let layer = SyntheticLayer::generate(shape)?;
    let src = reorder::chw_to_chw16c(&layer.src)?;
    let weight =
        reorder::oihw_to_oihw16i16o(&layer.weights, shape.out_channels, shape.in_channels)?;
    let bias = reorder::bias_from_f32(&layer.bias)?;
    let dst = Tensor::zeros(conv.dst_desc().clone())?;

    conv.set_src(&src)?;
    conv.set_weight(&weight)?;
    conv.set_bias(&bias)?;
    conv.set_dst(&dst)?;

    let work = conv.work_size();
    info!(
        "Running conv3x3 [{}] {} -> {} on {}",
        shape.post_op,
        conv.desc().src_desc,
        conv.dst_desc(),
        engine.name()
    );

    let mut samples = Vec::with_capacity(iterations);
    for iteration in 0..iterations {
        let _guard = timing_guard(format!("conv3x3 iteration {iteration}"), Level::Debug);
        let start = Instant::now();
        conv.submit()?;
        engine.wait().context("convolution kernel failed")?;
        samples.push(start.elapsed());
    }
    let timing = summarize(&samples);
    debug!("Timing: avg {:.3} ms over {} run(s)", timing.avg_ms, iterations);

    let verification = if verify {
        let expected = layer.reference(shape.post_op)?;
        let actual = reorder::chw16c_to_chw(&dst)?;
        Some(compare(&actual, &expected))
    } else {
        None
    };

    let report = RunReport {
        engine: engine.name().to_string(),
        arch: engine.arch().to_string(),
        threads: engine.num_threads(),
        post_op: shape.post_op,
        src: conv.desc().src_desc.dims().to_vec(),
        dst: conv.dst_desc().dims().to_vec(),
        global: work.global.dims(),
        local: work.local.dims(),
        groups: work.groups().dims(),
        eu_fusion: tiling.eu_fusion,
        timing,
        verification,
    };
    Ok(LayerRun { report, dst })
}

fn summarize(samples: &[Duration]) -> TimingSummary {
    let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1e3).collect();
    let total_ms: f64 = millis.iter().sum();
    TimingSummary {
        iterations: millis.len(),
        total_ms,
        avg_ms: total_ms / millis.len().max(1) as f64,
        min_ms: millis.iter().copied().fold(f64::INFINITY, f64::min),
        max_ms: millis.iter().copied().fold(0.0, f64::max),
    }
}

pub fn compare(actual: &PlanarTensor, expected: &PlanarTensor) -> Verification {
    let mut max_abs_error = 0.0f32;
    let mut mismatches = 0;
    for (&got, &want) in actual.data().iter().zip(expected.data()) {
        let error = (got - want).abs();
        max_abs_error = max_abs_error.max(error);
        if error.is_nan() || error > VERIFY_TOLERANCE * want.abs().max(1.0) {
            mismatches += 1;
        }
    }
    let shape_matches = actual.data().len() == expected.data().len();
    Verification {
        max_abs_error,
        mismatches,
        passed: shape_matches && mismatches == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_counts_mismatches() {
        let expected = PlanarTensor::new(1, 1, 3, vec![1.0, 100.0, 0.0]).expect("expected");
        let close = PlanarTensor::new(1, 1, 3, vec![1.005, 100.5, 0.0]).expect("close");
        let far = PlanarTensor::new(1, 1, 3, vec![1.5, 100.0, f32::NAN]).expect("far");

        let ok = compare(&close, &expected);
        assert!(ok.passed);
        assert!((ok.max_abs_error - 0.5).abs() < 1e-6);

        let bad = compare(&far, &expected);
        assert!(!bad.passed);
        assert_eq!(bad.mismatches, 2);
    }

    #[test]
    fn summary_handles_single_sample() {
        let summary = summarize(&[Duration::from_millis(4)]);
        assert_eq!(summary.iterations, 1);
        assert!((summary.avg_ms - 4.0).abs() < 1e-9);
        assert_eq!(summary.min_ms, summary.max_ms);
    }
}
