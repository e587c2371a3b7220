//! Core primitives of the denoise inference pipeline.
//!
//! The centrepiece is a fused 3x3 convolution (bias, ReLU and an optional
//! 2x2 max-pool or 2x nearest upsample) over channel-blocked half-precision
//! tensors, dispatched as a tiled work-group kernel on a [`CpuEngine`].
//!
//! [`CpuEngine`]: denoise_utils::CpuEngine

/// Fused convolution operator, tile kernel and work-group sizing.
pub mod conv;
/// Scalar `f32` reference implementations.
pub mod reference;
/// Layout conversion between plain host arrays and blocked tensors.
pub mod reorder;
/// Fixed-width half-precision vectors and lane masks.
pub mod simd;
/// Tensor descriptors, storage and blocked accessors.
pub mod tensor;

pub use conv::{
    BLOCK_IW, BLOCK_OH, BLOCK_OW, Conv, ConvDesc, ConvError, PostOp, TilingConfig, WorkSize,
};
pub use tensor::{
    BLOCK_C, DataType, PlanarTensor, Tensor, TensorDesc, TensorError, TensorLayout,
};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
