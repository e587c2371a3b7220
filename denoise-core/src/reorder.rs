//! Conversions between plain host arrays and the blocked device layouts.

use half::f16;

use crate::tensor::{
    PlanarTensor, Tensor, TensorAccessor3D, TensorAccessor4D, TensorDesc, TensorError,
};

/// Reorder a plain `C, H, W` tensor into a new `Chw16c` tensor.
pub fn chw_to_chw16c(src: &PlanarTensor) -> Result<Tensor, TensorError> {
    let desc = TensorDesc::chw16c(src.channels(), src.height(), src.width())?;
    let tensor = Tensor::zeros(desc)?;
    let acc = TensorAccessor3D::new(&tensor)?;

    let mut blocked = vec![f16::ZERO; tensor.len()];
    for c in 0..src.channels() {
        for h in 0..src.height() {
            for w in 0..src.width() {
                let offset = acc.offset(c, h as isize, w as isize) as usize;
                blocked[offset] = f16::from_f32(src.get(c, h, w));
            }
        }
    }
    tensor.write(&blocked)?;
    Ok(tensor)
}

/// Read a `Chw16c` tensor back into plain `C, H, W` order.
pub fn chw16c_to_chw(src: &Tensor) -> Result<PlanarTensor, TensorError> {
    let acc = TensorAccessor3D::new(src)?;
    let blocked = src.to_vec();
    PlanarTensor::from_fn(acc.c, acc.h, acc.w, |c, h, w| {
        blocked[acc.offset(c, h as isize, w as isize) as usize].to_f32()
    })
}

/// Reorder plain `O, I, 3, 3` weights into a new `OIhw16i16o` tensor.
pub fn oihw_to_oihw16i16o(
    weights: &[f32],
    out_channels: usize,
    in_channels: usize,
) -> Result<Tensor, TensorError> {
    let desc = TensorDesc::oihw16i16o(out_channels, in_channels)?;
    let expected = desc.num_elements();
    if weights.len() != expected {
        return Err(TensorError::LengthMismatch {
            expected,
            actual: weights.len(),
        });
    }
    let tensor = Tensor::zeros(desc)?;
    let acc = TensorAccessor4D::new(&tensor)?;

    let mut blocked = vec![f16::ZERO; tensor.len()];
    let mut plain = weights.iter();
    for o in 0..out_channels {
        for i in 0..in_channels {
            for kh in 0..acc.kh {
                for kw in 0..acc.kw {
                    if let Some(&value) = plain.next() {
                        blocked[acc.offset(o, i, kh, kw)] = f16::from_f32(value);
                    }
                }
            }
        }
    }
    tensor.write(&blocked)?;
    Ok(tensor)
}

/// Bias vector in `x` layout.
pub fn bias_from_f32(bias: &[f32]) -> Result<Tensor, TensorError> {
    Tensor::from_f32(TensorDesc::bias(bias.len())?, bias)
}
