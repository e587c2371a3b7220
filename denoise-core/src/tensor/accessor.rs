//! Address arithmetic for the blocked tensor layouts.
//!
//! Offsets are pure functions of the logical indices and perform no bounds
//! checks; callers decide which elements are valid. The block `load`/`store`
//! helpers are crate-private and only run inside leased kernels. They do
//! verify that the touched range lies inside the allocation so a wrong offset
//! panics instead of corrupting memory.

use super::buffer::Tensor;
use super::desc::{BLOCK_C, TensorDesc, TensorError, TensorLayout};
use crate::simd::Vector;

use half::f16;
use std::ptr;

fn expect_layout(desc: &TensorDesc, expected: TensorLayout) -> Result<(), TensorError> {
    if desc.layout() != expected {
        return Err(TensorError::UnexpectedLayout {
            expected,
            actual: desc.layout(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct RawView {
    tensor: Tensor,
    len: usize,
}

impl RawView {
    fn new(tensor: &Tensor) -> Self {
        Self {
            len: tensor.len(),
            tensor: tensor.clone(),
        }
    }

    fn check_range(&self, offset: usize, count: usize) {
        assert!(
            offset.checked_add(count).is_some_and(|end| end <= self.len),
            "tensor access [{offset}, {offset}+{count}) outside allocation of {}",
            self.len
        );
    }

    fn load<const N: usize>(&self, offset: usize) -> Vector<N> {
        self.check_range(offset, N);
        let mut out = Vector::<N>::ZERO;
        // SAFETY: range checked above; the destination is a local register.
        unsafe {
            ptr::copy_nonoverlapping(
                self.tensor.as_mut_ptr().add(offset),
                out.as_mut_slice().as_mut_ptr(),
                N,
            )
        };
        out
    }

    fn store<const N: usize>(&self, offset: usize, value: &Vector<N>) {
        self.store_lanes(offset, value.as_slice());
    }

    fn store_lanes(&self, offset: usize, lanes: &[f16]) {
        self.check_range(offset, lanes.len());
        // SAFETY: range checked above; concurrent work-items write disjoint ranges.
        unsafe {
            ptr::copy_nonoverlapping(
                lanes.as_ptr(),
                self.tensor.as_mut_ptr().add(offset),
                lanes.len(),
            )
        };
    }
}

/// Accessor for `Chw16c` activations: element `(c, h, w)` lives at
/// `((c / 16 * H + h) * W + w) * 16 + c % 16`.
#[derive(Debug, Clone)]
pub struct TensorAccessor3D {
    view: RawView,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl TensorAccessor3D {
    pub const BLOCK_C: usize = BLOCK_C;

    pub fn new(tensor: &Tensor) -> Result<Self, TensorError> {
        let desc = tensor.desc();
        expect_layout(desc, TensorLayout::Chw16c)?;
        Ok(Self {
            view: RawView::new(tensor),
            c: desc.channels(),
            h: desc.height(),
            w: desc.width(),
        })
    }

    /// Element offset of `(c, h, w)`; `h` and `w` may lie outside the tensor.
    pub fn offset(&self, c: usize, h: isize, w: isize) -> isize {
        let (h_dim, w_dim, block) = (self.h as isize, self.w as isize, BLOCK_C as isize);
        let c = c as isize;
        ((c / block * h_dim + h) * w_dim + w) * block + c % block
    }

    /// Load `N` contiguous elements starting at `offset`.
    pub(crate) fn load<const N: usize>(&self, offset: usize) -> Vector<N> {
        self.view.load(offset)
    }

    /// Store `N` contiguous elements starting at `offset`.
    pub(crate) fn store<const N: usize>(&self, offset: usize, value: &Vector<N>) {
        self.view.store(offset, value)
    }

    /// Store a sub-range of lanes starting at `offset`.
    pub(crate) fn store_lanes(&self, offset: usize, lanes: &[f16]) {
        self.view.store_lanes(offset, lanes)
    }
}

/// Accessor for `OIhw16i16o` weights: the 16x16 block of tap `(kh, kw)` for
/// channel blocks `(o / 16, i / 16)` is contiguous and indexed `[i % 16][o % 16]`.
#[derive(Debug, Clone)]
pub struct TensorAccessor4D {
    view: RawView,
    pub o: usize,
    pub i: usize,
    pub kh: usize,
    pub kw: usize,
}

impl TensorAccessor4D {
    pub fn new(tensor: &Tensor) -> Result<Self, TensorError> {
        let desc = tensor.desc();
        expect_layout(desc, TensorLayout::OIhw16i16o)?;
        let dims = desc.dims();
        Ok(Self {
            view: RawView::new(tensor),
            o: dims[0],
            i: dims[1],
            kh: dims[2],
            kw: dims[3],
        })
    }

    pub fn offset(&self, o: usize, i: usize, h: usize, w: usize) -> usize {
        let ib_count = self.i / BLOCK_C;
        let tap = ((o / BLOCK_C * ib_count + i / BLOCK_C) * self.kh + h) * self.kw + w;
        (tap * BLOCK_C + i % BLOCK_C) * BLOCK_C + o % BLOCK_C
    }

    pub(crate) fn load<const N: usize>(&self, offset: usize) -> Vector<N> {
        self.view.load(offset)
    }
}

/// Accessor for plain vectors (`x` layout).
#[derive(Debug, Clone)]
pub struct TensorAccessor1D {
    view: RawView,
    pub x: usize,
}

impl TensorAccessor1D {
    pub fn new(tensor: &Tensor) -> Result<Self, TensorError> {
        let desc = tensor.desc();
        expect_layout(desc, TensorLayout::X)?;
        Ok(Self {
            view: RawView::new(tensor),
            x: desc.dims()[0],
        })
    }

    pub fn offset(&self, x: usize) -> usize {
        x
    }

    pub(crate) fn load<const N: usize>(&self, offset: usize) -> Vector<N> {
        self.view.load(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(desc: TensorDesc) -> Tensor {
        let data: Vec<f16> = (0..desc.num_elements())
            .map(|i| f16::from_f32(i as f32))
            .collect();
        Tensor::from_data(desc, &data).expect("tensor")
    }

    #[test]
    fn chw16c_offsets_follow_blocking() {
        let tensor = Tensor::zeros(TensorDesc::chw16c(32, 3, 5).expect("desc")).expect("alloc");
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        assert_eq!(acc.offset(0, 0, 0), 0);
        assert_eq!(acc.offset(5, 0, 0), 5);
        assert_eq!(acc.offset(0, 0, 1), 16);
        assert_eq!(acc.offset(0, 1, 0), 5 * 16);
        assert_eq!(acc.offset(17, 0, 0), 3 * 5 * 16 + 1);
        assert_eq!(acc.offset(31, 2, 4), 3 * 5 * 16 * 2 - 1);
        // Halo columns resolve to neighbouring addresses without panicking.
        assert_eq!(acc.offset(0, 0, -1), -16);
    }

    #[test]
    fn oihw16i16o_tap_blocks_are_contiguous() {
        let tensor =
            Tensor::zeros(TensorDesc::oihw16i16o(32, 32).expect("desc")).expect("alloc");
        let acc = TensorAccessor4D::new(&tensor).expect("accessor");
        assert_eq!(acc.offset(0, 0, 0, 0), 0);
        assert_eq!(acc.offset(1, 0, 0, 0), 1);
        assert_eq!(acc.offset(0, 1, 0, 0), 16);
        assert_eq!(acc.offset(0, 0, 0, 1), 256);
        assert_eq!(acc.offset(0, 0, 1, 0), 3 * 256);
        assert_eq!(acc.offset(0, 16, 0, 0), 9 * 256);
        assert_eq!(acc.offset(16, 0, 0, 0), 2 * 9 * 256);
        assert_eq!(acc.offset(31, 31, 2, 2), 32 * 32 * 9 - 1);
    }

    #[test]
    fn load_and_store_blocks() {
        let tensor = iota(TensorDesc::chw16c(16, 2, 2).expect("desc"));
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        let block: Vector<16> = acc.load(acc.offset(0, 1, 0) as usize);
        assert_eq!(block[0], f16::from_f32(32.0));
        assert_eq!(block[15], f16::from_f32(47.0));

        acc.store(0, &Vector::<16>::splat(f16::ONE));
        assert_eq!(tensor.to_vec()[15], f16::ONE);
        assert_eq!(tensor.to_vec()[16], f16::from_f32(16.0));

        let bias = iota(TensorDesc::bias(32).expect("desc"));
        let bias_acc = TensorAccessor1D::new(&bias).expect("accessor");
        let upper: Vector<16> = bias_acc.load(bias_acc.offset(16));
        assert_eq!(upper[0], f16::from_f32(16.0));
    }

    #[test]
    #[should_panic(expected = "outside allocation")]
    fn out_of_range_load_panics() {
        let tensor = Tensor::zeros(TensorDesc::chw16c(16, 1, 1).expect("desc")).expect("alloc");
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        let _: Vector<32> = acc.load(0);
    }

    #[test]
    fn rejects_wrong_layout() {
        let bias = Tensor::zeros(TensorDesc::bias(16).expect("desc")).expect("alloc");
        assert!(matches!(
            TensorAccessor3D::new(&bias),
            Err(TensorError::UnexpectedLayout {
                expected: TensorLayout::Chw16c,
                ..
            })
        ));
    }
}
