use std::fmt;

use thiserror::Error;

/// Channel block size of the blocked layouts used by the convolution kernel.
pub const BLOCK_C: usize = 16;

/// Physical element ordering of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorLayout {
    /// Plain vector (`x`), used for biases.
    X,
    /// Planar channels (`C, H, W`).
    Chw,
    /// Channels grouped in blocks of 8 (`C/8, H, W, 8`).
    Chw8c,
    /// Channels grouped in blocks of 16 (`C/16, H, W, 16`).
    Chw16c,
    /// Plain convolution weights (`O, I, H, W`).
    OIhw,
    /// Weights blocked 8x8 on input/output channels.
    OIhw8i8o,
    /// Weights blocked 16x16 on input/output channels (`O/16, I/16, H, W, 16i, 16o`).
    OIhw16i16o,
}

impl TensorLayout {
    /// Number of logical dimensions the layout describes.
    pub fn rank(self) -> usize {
        match self {
            TensorLayout::X => 1,
            TensorLayout::Chw | TensorLayout::Chw8c | TensorLayout::Chw16c => 3,
            TensorLayout::OIhw | TensorLayout::OIhw8i8o | TensorLayout::OIhw16i16o => 4,
        }
    }

    /// Channel block size (1 for unblocked layouts).
    pub fn block_c(self) -> usize {
        match self {
            TensorLayout::X | TensorLayout::Chw | TensorLayout::OIhw => 1,
            TensorLayout::Chw8c | TensorLayout::OIhw8i8o => 8,
            TensorLayout::Chw16c | TensorLayout::OIhw16i16o => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TensorLayout::X => "x",
            TensorLayout::Chw => "chw",
            TensorLayout::Chw8c => "Chw8c",
            TensorLayout::Chw16c => "Chw16c",
            TensorLayout::OIhw => "oihw",
            TensorLayout::OIhw8i8o => "OIhw8i8o",
            TensorLayout::OIhw16i16o => "OIhw16i16o",
        }
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float32,
    Float16,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float16 => 2,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Float32 => "f32",
            DataType::Float16 => "f16",
        })
    }
}

/// Errors raised while describing or filling tensors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("layout {layout} expects {expected} dimensions, got {actual:?}")]
    RankMismatch {
        layout: TensorLayout,
        expected: usize,
        actual: Vec<usize>,
    },
    #[error("dimension {index} must be greater than zero (dims {dims:?})")]
    EmptyDimension { index: usize, dims: Vec<usize> },
    #[error("layout {layout} requires channel counts divisible by {block} (dims {dims:?})")]
    UnalignedChannels {
        layout: TensorLayout,
        block: usize,
        dims: Vec<usize>,
    },
    #[error("tensor shape {0:?} overflows usize")]
    Overflow(Vec<usize>),
    #[error("host tensors store f16 elements, descriptor requests {0}")]
    UnsupportedDataType(DataType),
    #[error("expected layout {expected}, got {actual}")]
    UnexpectedLayout {
        expected: TensorLayout,
        actual: TensorLayout,
    },
    #[error("expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Shape, layout and element type of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    dims: Vec<usize>,
    layout: TensorLayout,
    data_type: DataType,
}

impl TensorDesc {
    /// Create a validated descriptor.
    ///
    /// Blocked layouts require every blocked channel axis to be a multiple of
    /// the layout's block size.
    pub fn new<D>(dims: D, layout: TensorLayout, data_type: DataType) -> Result<Self, TensorError>
    where
        D: Into<Vec<usize>>,
    {
        let dims = dims.into();
        if dims.len() != layout.rank() {
            return Err(TensorError::RankMismatch {
                layout,
                expected: layout.rank(),
                actual: dims,
            });
        }
        if let Some(index) = dims.iter().position(|&d| d == 0) {
            return Err(TensorError::EmptyDimension { index, dims });
        }
        let block = layout.block_c();
        let blocked_axes: &[usize] = match layout.rank() {
            3 => &[0],
            4 => &[0, 1],
            _ => &[],
        };
        if blocked_axes.iter().any(|&axis| dims[axis] % block != 0) {
            return Err(TensorError::UnalignedChannels {
                layout,
                block,
                dims,
            });
        }
        if dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(TensorError::Overflow(dims));
        }
        Ok(Self {
            dims,
            layout,
            data_type,
        })
    }

    /// Source/destination activation descriptor (`Chw16c`, f16).
    pub fn chw16c(channels: usize, height: usize, width: usize) -> Result<Self, TensorError> {
        Self::new(
            [channels, height, width],
            TensorLayout::Chw16c,
            DataType::Float16,
        )
    }

    /// 3x3 weight descriptor (`OIhw16i16o`, f16).
    pub fn oihw16i16o(out_channels: usize, in_channels: usize) -> Result<Self, TensorError> {
        Self::new(
            [out_channels, in_channels, 3, 3],
            TensorLayout::OIhw16i16o,
            DataType::Float16,
        )
    }

    /// Bias descriptor (`x`, f16).
    pub fn bias(len: usize) -> Result<Self, TensorError> {
        Self::new([len], TensorLayout::X, DataType::Float16)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.num_elements() * self.data_type.size()
    }

    /// Channel count of a 3-D tensor (or output channels of a weight tensor).
    pub fn channels(&self) -> usize {
        self.dims[0]
    }

    /// Height of a 3-D tensor.
    pub fn height(&self) -> usize {
        self.dims[self.dims.len().saturating_sub(2)]
    }

    /// Width of a 3-D tensor.
    pub fn width(&self) -> usize {
        self.dims[self.dims.len() - 1]
    }

    /// Number of channel blocks of the leading axis.
    pub fn channel_blocks(&self) -> usize {
        self.dims[0] / self.layout.block_c()
    }

    /// Same descriptor with different dimensions (re-validated).
    pub fn with_dims<D>(&self, dims: D) -> Result<Self, TensorError>
    where
        D: Into<Vec<usize>>,
    {
        Self::new(dims, self.layout, self.data_type)
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.layout, self.data_type, self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_rank() {
        let err = TensorDesc::new([16, 4], TensorLayout::Chw16c, DataType::Float16).unwrap_err();
        assert!(matches!(err, TensorError::RankMismatch { expected: 3, .. }));
    }

    #[test]
    fn rejects_unaligned_channels() {
        assert!(matches!(
            TensorDesc::chw16c(24, 4, 4),
            Err(TensorError::UnalignedChannels { block: 16, .. })
        ));
        assert!(matches!(
            TensorDesc::oihw16i16o(16, 8),
            Err(TensorError::UnalignedChannels { .. })
        ));
        // Plain layouts carry no channel constraint.
        TensorDesc::new([3, 5, 7], TensorLayout::Chw, DataType::Float32).expect("plain chw");
    }

    #[test]
    fn rejects_zero_dimension() {
        assert!(matches!(
            TensorDesc::chw16c(16, 0, 4),
            Err(TensorError::EmptyDimension { index: 1, .. })
        ));
    }

    #[test]
    fn accessors_report_geometry() {
        let desc = TensorDesc::chw16c(32, 5, 10).expect("desc");
        assert_eq!(desc.channels(), 32);
        assert_eq!(desc.height(), 5);
        assert_eq!(desc.width(), 10);
        assert_eq!(desc.channel_blocks(), 2);
        assert_eq!(desc.num_elements(), 32 * 5 * 10);
        assert_eq!(desc.byte_size(), 32 * 5 * 10 * 2);
        assert_eq!(desc.to_string(), "Chw16c f16 [32, 5, 10]");

        let weight = TensorDesc::oihw16i16o(32, 16).expect("weight");
        assert_eq!(weight.channel_blocks(), 2);
        assert_eq!(weight.height(), 3);
        assert_eq!(weight.width(), 3);
    }
}
