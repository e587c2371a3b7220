//! Scalar `f32` implementations of the fused layer, used to check the tiled kernel.

use crate::tensor::{PlanarTensor, TensorError};

/// `ReLU(bias[o] + sum weight[o, i, kh, kw] * src[i, h + kh - 1, w + kw - 1])`
/// with zero padding. `weights` is plain `O, I, 3, 3`.
pub fn conv3x3_relu(
    src: &PlanarTensor,
    weights: &[f32],
    bias: &[f32],
) -> Result<PlanarTensor, TensorError> {
    let (in_channels, height, width) = (src.channels(), src.height(), src.width());
    let out_channels = bias.len();
    let expected = out_channels * in_channels * 9;
    if weights.len() != expected {
        return Err(TensorError::LengthMismatch {
            expected,
            actual: weights.len(),
        });
    }

    PlanarTensor::from_fn(out_channels, height, width, |o, h, w| {
        let mut sum = bias[o];
        for i in 0..in_channels {
            let taps = &weights[(o * in_channels + i) * 9..][..9];
            for kh in 0..3 {
                let ih = h as isize + kh as isize - 1;
                for kw in 0..3 {
                    let iw = w as isize + kw as isize - 1;
                    sum += taps[kh * 3 + kw] * src.get_padded(i, ih, iw);
                }
            }
        }
        sum.max(0.0)
    })
}

/// 2x2 max-pool with stride 2; a trailing odd row or column is dropped.
pub fn max_pool2x2(src: &PlanarTensor) -> Result<PlanarTensor, TensorError> {
    PlanarTensor::from_fn(src.channels(), src.height() / 2, src.width() / 2, |c, h, w| {
        let (h0, w0) = (2 * h, 2 * w);
        src.get(c, h0, w0)
            .max(src.get(c, h0, w0 + 1))
            .max(src.get(c, h0 + 1, w0))
            .max(src.get(c, h0 + 1, w0 + 1))
    })
}

/// Nearest-neighbour 2x upsampling.
pub fn upsample2x(src: &PlanarTensor) -> Result<PlanarTensor, TensorError> {
    PlanarTensor::from_fn(src.channels(), src.height() * 2, src.width() * 2, |c, h, w| {
        src.get(c, h / 2, w / 2)
    })
}
