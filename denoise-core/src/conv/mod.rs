//! Fused 3x3 convolution operator (bias, ReLU and an optional pooling or
//! upsampling epilogue) over `Chw16c` half-precision tensors.
//!
//! The operator validates its descriptors once at construction, holds
//! non-owning handles to the bound tensors and dispatches one tiled kernel
//! per [`Conv::submit`]. Completion is signalled by the engine's `wait`.

mod kernel;
mod rows;
mod sizer;

use std::{fmt, sync::Arc};

use denoise_utils::CpuEngine;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{BLOCK_C, DataType, Tensor, TensorDesc, TensorError, TensorLayout};

pub use kernel::{ConvKernel, Epilogue, NoPostOp, PoolPostOp, UpsamplePostOp};
pub use rows::{BLOCK_IW, BLOCK_OH, BLOCK_OW};
pub use sizer::{TilingConfig, WorkSize, conv_global_items, size_work_groups};

const LOG_TARGET: &str = "denoise::conv";

/// Epilogue fused after bias and ReLU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostOp {
    #[default]
    None,
    /// 2x2 max-pool, stride 2.
    Pool,
    /// Nearest-neighbour 2x upsampling.
    Upsample,
}

impl PostOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PostOp::None => "none",
            PostOp::Pool => "pool",
            PostOp::Upsample => "upsample",
        }
    }
}

impl fmt::Display for PostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by [`Conv`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvError {
    #[error("unsupported source tensor: {layout} {data_type} (expected Chw16c f16)")]
    UnsupportedSource {
        layout: TensorLayout,
        data_type: DataType,
    },
    #[error("unsupported weight tensor: {layout} {data_type} (expected OIhw16i16o f16)")]
    UnsupportedWeight {
        layout: TensorLayout,
        data_type: DataType,
    },
    #[error("unsupported bias tensor: {layout} {data_type} (expected x f16)")]
    UnsupportedBias {
        layout: TensorLayout,
        data_type: DataType,
    },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("convolution argument `{0}` is not set")]
    ArgumentNotSet(&'static str),
    #[error("{operand} tensor is {actual}, operator expects {expected}")]
    DescriptorMismatch {
        operand: &'static str,
        expected: String,
        actual: String,
    },
    #[error("destination must not share storage with the source")]
    AliasedOperands,
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Operand descriptors of a fused convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDesc {
    pub src_desc: TensorDesc,
    pub weight_desc: TensorDesc,
    pub bias_desc: TensorDesc,
    pub post_op: PostOp,
}

impl ConvDesc {
    /// Descriptors for a layer mapping `in_channels` to `out_channels` over a
    /// `height x width` image.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
        post_op: PostOp,
    ) -> Result<Self, TensorError> {
        Ok(Self {
            src_desc: TensorDesc::chw16c(in_channels, height, width)?,
            weight_desc: TensorDesc::oihw16i16o(out_channels, in_channels)?,
            bias_desc: TensorDesc::bias(out_channels)?,
            post_op,
        })
    }

    /// Destination descriptor implied by the source, weights and post-op.
    pub fn dst_desc(&self) -> Result<TensorDesc, TensorError> {
        let out_channels = self.weight_desc.dims()[0];
        let (height, width) = (self.src_desc.height(), self.src_desc.width());
        let (height, width) = match self.post_op {
            PostOp::None => (height, width),
            PostOp::Pool => (height / 2, width / 2),
            PostOp::Upsample => (height * 2, width * 2),
        };
        self.src_desc.with_dims([out_channels, height, width])
    }

    fn validate(&self) -> Result<(), ConvError> {
        let src = &self.src_desc;
        if src.layout() != TensorLayout::Chw16c || src.data_type() != DataType::Float16 {
            return Err(ConvError::UnsupportedSource {
                layout: src.layout(),
                data_type: src.data_type(),
            });
        }
        let weight = &self.weight_desc;
        if weight.layout() != TensorLayout::OIhw16i16o || weight.data_type() != DataType::Float16
        {
            return Err(ConvError::UnsupportedWeight {
                layout: weight.layout(),
                data_type: weight.data_type(),
            });
        }
        let bias = &self.bias_desc;
        if bias.layout() != TensorLayout::X || bias.data_type() != DataType::Float16 {
            return Err(ConvError::UnsupportedBias {
                layout: bias.layout(),
                data_type: bias.data_type(),
            });
        }

        let &[out_channels, in_channels, kh, kw] = weight.dims() else {
            return Err(ConvError::ShapeMismatch(format!(
                "weights must be 4-D, got {:?}",
                weight.dims()
            )));
        };
        if (kh, kw) != (3, 3) {
            return Err(ConvError::ShapeMismatch(format!(
                "only 3x3 kernels are supported, got {kh}x{kw}"
            )));
        }
        if in_channels != src.channels() {
            return Err(ConvError::ShapeMismatch(format!(
                "weights expect {in_channels} input channels, source has {}",
                src.channels()
            )));
        }
        if bias.dims()[0] != out_channels {
            return Err(ConvError::ShapeMismatch(format!(
                "bias has {} elements for {out_channels} output channels",
                bias.dims()[0]
            )));
        }
        self.dst_desc()?;
        Ok(())
    }
}

/// Fused convolution layer bound to an engine.
///
/// Construct once per layer; rebind operands and call [`Conv::submit`] for
/// every inference. The operator keeps no intermediate state between
/// submissions.
pub struct Conv {
    engine: Arc<CpuEngine>,
    desc: ConvDesc,
    dst_desc: TensorDesc,
    tiling: TilingConfig,
    src: Option<Tensor>,
    weight: Option<Tensor>,
    bias: Option<Tensor>,
    dst: Option<Tensor>,
}

impl Conv {
    /// Validate `desc` and create the operator.
    pub fn new(engine: Arc<CpuEngine>, desc: ConvDesc) -> Result<Self, ConvError> {
        desc.validate()?;
        let dst_desc = desc.dst_desc()?;
        debug!(
            target: LOG_TARGET,
            "Created conv3x3 [{}] src={} weight={} dst={}",
            desc.post_op,
            desc.src_desc,
            desc.weight_desc,
            dst_desc
        );
        Ok(Self {
            engine,
            desc,
            dst_desc,
            tiling: TilingConfig::default(),
            src: None,
            weight: None,
            bias: None,
            dst: None,
        })
    }

    /// Override the work-group heuristic.
    pub fn with_tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn desc(&self) -> &ConvDesc {
        &self.desc
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    pub fn post_op(&self) -> PostOp {
        self.desc.post_op
    }

    pub fn tiling(&self) -> &TilingConfig {
        &self.tiling
    }

    pub fn set_src(&mut self, src: &Tensor) -> Result<(), ConvError> {
        check_desc("src", &self.desc.src_desc, src)?;
        self.src = Some(src.clone());
        Ok(())
    }

    pub fn set_weight(&mut self, weight: &Tensor) -> Result<(), ConvError> {
        check_desc("weight", &self.desc.weight_desc, weight)?;
        self.weight = Some(weight.clone());
        Ok(())
    }

    pub fn set_bias(&mut self, bias: &Tensor) -> Result<(), ConvError> {
        check_desc("bias", &self.desc.bias_desc, bias)?;
        self.bias = Some(bias.clone());
        Ok(())
    }

    pub fn set_dst(&mut self, dst: &Tensor) -> Result<(), ConvError> {
        check_desc("dst", &self.dst_desc, dst)?;
        self.dst = Some(dst.clone());
        Ok(())
    }

    /// Grid the next submission will dispatch.
    pub fn work_size(&self) -> WorkSize {
        let global = conv_global_items(
            self.dst_desc.channel_blocks(),
            self.desc.src_desc.height(),
            self.desc.src_desc.width(),
        );
        size_work_groups(global, &self.tiling)
    }

    /// Queue the convolution on the engine. Kernels of the same engine run in
    /// submission order, so the output can feed the next layer directly.
    /// Results are visible to the host after the engine's `wait`, and host
    /// copies of the bound tensors block until the kernel has run.
    pub fn submit(&self) -> Result<(), ConvError> {
        let src = self.src.as_ref().ok_or(ConvError::ArgumentNotSet("src"))?;
        let weight = self
            .weight
            .as_ref()
            .ok_or(ConvError::ArgumentNotSet("weight"))?;
        let bias = self.bias.as_ref().ok_or(ConvError::ArgumentNotSet("bias"))?;
        let dst = self.dst.as_ref().ok_or(ConvError::ArgumentNotSet("dst"))?;
        if dst.ptr_eq(src) {
            return Err(ConvError::AliasedOperands);
        }

        match self.desc.post_op {
            PostOp::None => self.run_impl::<NoPostOp>(src, weight, bias, dst),
            PostOp::Pool => self.run_impl::<PoolPostOp>(src, weight, bias, dst),
            PostOp::Upsample => self.run_impl::<UpsamplePostOp>(src, weight, bias, dst),
        }
    }

    fn run_impl<E: Epilogue>(
        &self,
        src: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        dst: &Tensor,
    ) -> Result<(), ConvError> {
        let kernel = ConvKernel::<E>::new(self.engine.id(), src, weight, bias, dst)?;
        let work = self.work_size();
        debug!(
            target: LOG_TARGET,
            "Dispatching conv3x3 [{}]: global={} local={} block={}x{}x{}",
            E::POST_OP,
            work.global,
            work.local,
            BLOCK_C,
            BLOCK_OH,
            BLOCK_OW
        );

        let label = format!("conv3x3_{}", E::POST_OP);
        self.engine
            .submit_kernel(&label, work.groups(), work.local, move |item| {
                kernel.run(item)
            });
        Ok(())
    }
}

impl fmt::Debug for Conv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conv")
            .field("engine", &self.engine.name())
            .field("desc", &self.desc)
            .field("tiling", &self.tiling)
            .finish()
    }
}

fn check_desc(
    operand: &'static str,
    expected: &TensorDesc,
    tensor: &Tensor,
) -> Result<(), ConvError> {
    if tensor.desc() != expected {
        return Err(ConvError::DescriptorMismatch {
            operand,
            expected: expected.to_string(),
            actual: tensor.desc().to_string(),
        });
    }
    Ok(())
}
