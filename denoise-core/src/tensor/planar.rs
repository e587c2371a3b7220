use super::desc::TensorError;

/// Host-side `f32` tensor in plain `C, H, W` order.
///
/// Used to stage data before reordering into the blocked device layout and
/// as the representation of the scalar reference path.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl PlanarTensor {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
    ) -> Result<Self, TensorError> {
        let dims = vec![channels, height, width];
        if let Some(index) = dims.iter().position(|&d| d == 0) {
            return Err(TensorError::EmptyDimension { index, dims });
        }
        let expected = channels
            .checked_mul(height)
            .and_then(|v| v.checked_mul(width))
            .ok_or_else(|| TensorError::Overflow(dims.clone()))?;
        if data.len() != expected {
            return Err(TensorError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Result<Self, TensorError> {
        Self::new(
            channels,
            height,
            width,
            vec![0.0; channels * height * width],
        )
    }

    /// Build a tensor by evaluating `f(c, h, w)` for every element.
    pub fn from_fn(
        channels: usize,
        height: usize,
        width: usize,
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Result<Self, TensorError> {
        let mut data = Vec::with_capacity(channels * height * width);
        for c in 0..channels {
            for h in 0..height {
                for w in 0..width {
                    data.push(f(c, h, w));
                }
            }
        }
        Self::new(channels, height, width, data)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    fn index(&self, c: usize, h: usize, w: usize) -> usize {
        (c * self.height + h) * self.width + w
    }

    pub fn get(&self, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.index(c, h, w)]
    }

    /// Value at `(c, h, w)`, or zero when `h`/`w` fall outside the tensor.
    pub fn get_padded(&self, c: usize, h: isize, w: isize) -> f32 {
        if h < 0 || w < 0 || h as usize >= self.height || w as usize >= self.width {
            0.0
        } else {
            self.get(c, h as usize, w as usize)
        }
    }

    pub fn set(&mut self, c: usize, h: usize, w: usize, value: f32) {
        let index = self.index(c, h, w);
        self.data[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_is_row_major() {
        let t = PlanarTensor::from_fn(2, 2, 3, |c, h, w| (c * 100 + h * 10 + w) as f32)
            .expect("tensor");
        assert_eq!(t.data()[..4], [0.0, 1.0, 2.0, 10.0]);
        assert_eq!(t.get(1, 1, 2), 112.0);
        assert_eq!(t.get_padded(1, -1, 0), 0.0);
        assert_eq!(t.get_padded(1, 0, 3), 0.0);
        assert_eq!(t.get_padded(1, 1, 2), 112.0);
    }

    #[test]
    fn rejects_length_mismatch() {
        assert_eq!(
            PlanarTensor::new(1, 2, 2, vec![0.0; 3]).unwrap_err(),
            TensorError::LengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }
}
