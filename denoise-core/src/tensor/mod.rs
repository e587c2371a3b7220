//! Tensor descriptors, shared half-precision storage and blocked accessors.

mod accessor;
mod buffer;
mod desc;
mod planar;

pub use accessor::{TensorAccessor1D, TensorAccessor3D, TensorAccessor4D};
pub use buffer::Tensor;
pub(crate) use buffer::TensorLease;
pub use desc::{BLOCK_C, DataType, TensorDesc, TensorError, TensorLayout};
pub use planar::PlanarTensor;
