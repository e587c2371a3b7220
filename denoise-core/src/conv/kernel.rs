use std::marker::PhantomData;

use denoise_utils::WorkGroupItem;
use half::f16;

use super::PostOp;
use super::rows::{
    BLOCK_IW, BLOCK_OH, BLOCK_OW, IN_ROW, ROW, WEIGHT_BLOCK, load_row, store_row,
};
use crate::simd::Vector;
use crate::tensor::{
    BLOCK_C, Tensor, TensorAccessor1D, TensorAccessor3D, TensorAccessor4D, TensorError,
    TensorLease,
};

type AccumRows = [Vector<ROW>; BLOCK_OH];

const POOLED_W: usize = BLOCK_OW / 2;
const POOLED_ROW: usize = POOLED_W * BLOCK_C;
const UP_ROW: usize = 2 * ROW;

mod sealed {
    pub trait Sealed {}
}

/// Fused stage applied to the activated accumulator tile before it is stored.
pub trait Epilogue: sealed::Sealed + Send + Sync + 'static {
    const POST_OP: PostOp;

    /// Write the tile whose top-left output is `(oc, oh, ow)` in convolution
    /// coordinates; `conv_height` is the height of the unfused output.
    fn store(
        dst: &TensorAccessor3D,
        rows: &AccumRows,
        conv_height: usize,
        oc: usize,
        oh: usize,
        ow: usize,
    );
}

#[derive(Debug, Clone, Copy)]
pub struct NoPostOp;

#[derive(Debug, Clone, Copy)]
pub struct PoolPostOp;

#[derive(Debug, Clone, Copy)]
pub struct UpsamplePostOp;

impl sealed::Sealed for NoPostOp {}
impl sealed::Sealed for PoolPostOp {}
impl sealed::Sealed for UpsamplePostOp {}

impl Epilogue for NoPostOp {
    const POST_OP: PostOp = PostOp::None;

    fn store(
        dst: &TensorAccessor3D,
        rows: &AccumRows,
        _conv_height: usize,
        oc: usize,
        oh: usize,
        ow: usize,
    ) {
        for (boh, row) in rows.iter().enumerate() {
            if oh + boh < dst.h {
                store_row::<1, ROW, BLOCK_OW>(dst, row, oc, oh + boh, ow);
            }
        }
    }
}

impl Epilogue for PoolPostOp {
    const POST_OP: PostOp = PostOp::Pool;

    fn store(
        dst: &TensorAccessor3D,
        rows: &AccumRows,
        conv_height: usize,
        oc: usize,
        oh: usize,
        ow: usize,
    ) {
        for boh in (0..BLOCK_OH).step_by(2) {
            // An unpaired trailing row has no pooled output.
            if oh + boh >= conv_height || (oh + boh) / 2 >= dst.h {
                continue;
            }
            let vertical = rows[boh].max(&rows[boh + 1]);
            let mut pooled = Vector::<POOLED_ROW>::ZERO;
            for col in 0..POOLED_W {
                let left: Vector<BLOCK_C> = vertical.block(2 * col * BLOCK_C);
                let right: Vector<BLOCK_C> = vertical.block((2 * col + 1) * BLOCK_C);
                pooled.set_block(col * BLOCK_C, &left.max(&right));
            }
            store_row::<1, POOLED_ROW, POOLED_W>(dst, &pooled, oc, (oh + boh) / 2, ow / 2);
        }
    }
}

impl Epilogue for UpsamplePostOp {
    const POST_OP: PostOp = PostOp::Upsample;

    fn store(
        dst: &TensorAccessor3D,
        rows: &AccumRows,
        conv_height: usize,
        oc: usize,
        oh: usize,
        ow: usize,
    ) {
        for (boh, row) in rows.iter().enumerate() {
            let h = oh + boh;
            if h >= conv_height {
                continue;
            }
            let mut doubled = Vector::<UP_ROW>::ZERO;
            for col in 0..BLOCK_OW {
                let pixel: Vector<BLOCK_C> = row.block(col * BLOCK_C);
                doubled.set_block(2 * col * BLOCK_C, &pixel);
                doubled.set_block((2 * col + 1) * BLOCK_C, &pixel);
            }
            store_row::<2, UP_ROW, BLOCK_OW>(dst, &doubled, oc, 2 * h, 2 * ow);
            store_row::<2, UP_ROW, BLOCK_OW>(dst, &doubled, oc, 2 * h + 1, 2 * ow);
        }
    }
}

/// Work-item body of the fused convolution, specialized on its epilogue.
///
/// Work-item `(c, h, w)` produces output channels `16c..16c+16`, rows
/// `2h..2h+2` and columns `8w..8w+8` of the unfused convolution.
///
/// The kernel leases its four operands for as long as it exists, which keeps
/// host copies of them waiting until it has run and been dropped.
pub struct ConvKernel<E> {
    src: TensorAccessor3D,
    weight: TensorAccessor4D,
    bias: TensorAccessor1D,
    dst: TensorAccessor3D,
    _leases: [TensorLease; 4],
    epilogue: PhantomData<fn() -> E>,
}

impl<E: Epilogue> ConvKernel<E> {
    /// Build the kernel for engine queue `queue`, leasing every operand.
    pub(super) fn new(
        queue: u64,
        src: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        dst: &Tensor,
    ) -> Result<Self, TensorError> {
        let accessors = (
            TensorAccessor3D::new(src)?,
            TensorAccessor4D::new(weight)?,
            TensorAccessor1D::new(bias)?,
            TensorAccessor3D::new(dst)?,
        );
        Ok(Self {
            src: accessors.0,
            weight: accessors.1,
            bias: accessors.2,
            dst: accessors.3,
            _leases: [src, weight, bias, dst].map(|tensor| tensor.lease(queue)),
            epilogue: PhantomData,
        })
    }

    pub fn run(&self, item: &WorkGroupItem<3>) {
        let oc = item.global_id(0) * BLOCK_C;
        let oh = item.global_id(1) * BLOCK_OH;
        let ow = item.global_id(2) * BLOCK_OW;

        let mut accum: AccumRows = [Vector::ZERO; BLOCK_OH];
        let ih = oh as isize - 1;
        let iw = ow as isize - 1;

        for ic in (0..self.src.c).step_by(BLOCK_C) {
            let mut rows = [Vector::<IN_ROW>::ZERO; BLOCK_OH];
            for (r, row) in rows.iter_mut().enumerate().take(BLOCK_OH - 1) {
                *row = load_row::<IN_ROW, BLOCK_IW>(&self.src, ic, ih + r as isize, iw);
            }

            for kh in 0..3 {
                let next = kh + BLOCK_OH - 1;
                rows[next % BLOCK_OH] =
                    load_row::<IN_ROW, BLOCK_IW>(&self.src, ic, ih + next as isize, iw);

                let taps: [Vector<WEIGHT_BLOCK>; 3] = std::array::from_fn(|kw| {
                    self.weight.load(self.weight.offset(oc, ic, kh, kw))
                });

                for (kw, tap) in taps.iter().enumerate() {
                    for i in 0..BLOCK_C {
                        let weights: Vector<BLOCK_C> = tap.block(i * BLOCK_C);
                        for (boh, acc) in accum.iter_mut().enumerate() {
                            let input = &rows[(kh + boh) % BLOCK_OH];
                            for bow in 0..BLOCK_OW {
                                let x: f16 = input[(kw + bow) * BLOCK_C + i];
                                acc.mul_add_block(bow * BLOCK_C, x, &weights);
                            }
                        }
                    }
                }
            }
        }

        let bias: Vector<BLOCK_C> = self.bias.load(self.bias.offset(oc));
        let bias_row: Vector<ROW> = bias.replicate();
        for acc in &mut accum {
            *acc = (*acc + bias_row).relu();
        }

        E::store(&self.dst, &accum, self.src.h, oc, oh, ow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder;
    use crate::tensor::{PlanarTensor, TensorDesc};
    use denoise_utils::WorkDim;

    fn ones(desc: TensorDesc) -> Tensor {
        let tensor = Tensor::zeros(desc).expect("alloc");
        tensor.fill(f16::ONE);
        tensor
    }

    fn run_single_tile<E: Epilogue>(dst_desc: TensorDesc) -> Tensor {
        let src = ones(TensorDesc::chw16c(16, 2, 8).expect("src"));
        let weight = ones(TensorDesc::oihw16i16o(16, 16).expect("weight"));
        let bias = Tensor::zeros(TensorDesc::bias(16).expect("bias")).expect("bias");
        let dst = Tensor::zeros(dst_desc).expect("dst");
        run_tile::<E>(&src, &weight, &bias, &dst);
        dst
    }

    fn run_tile<E: Epilogue>(src: &Tensor, weight: &Tensor, bias: &Tensor, dst: &Tensor) {
        let kernel = ConvKernel::<E>::new(0, src, weight, bias, dst).expect("kernel");
        let one = WorkDim::new([1, 1, 1]);
        kernel.run(&WorkGroupItem::new([0, 0, 0], [0, 0, 0], one, one));
    }

    #[test]
    fn single_tile_counts_valid_taps() {
        let dst = run_single_tile::<NoPostOp>(TensorDesc::chw16c(16, 2, 8).expect("dst"));
        let acc = TensorAccessor3D::new(&dst).expect("accessor");
        let values = dst.to_f32();
        // Two rows: every output sees 2 input rows; corners see 2 columns.
        assert_eq!(values[acc.offset(0, 0, 0) as usize], 4.0 * 16.0);
        assert_eq!(values[acc.offset(7, 1, 3) as usize], 6.0 * 16.0);
        assert_eq!(values[acc.offset(15, 1, 7) as usize], 4.0 * 16.0);
    }

    #[test]
    fn pool_epilogue_halves_the_tile() {
        let dst = run_single_tile::<PoolPostOp>(TensorDesc::chw16c(16, 1, 4).expect("dst"));
        let values = dst.to_f32();
        assert!(values.iter().all(|&v| v == 96.0));
    }

    #[test]
    fn upsample_epilogue_doubles_the_tile() {
        let dst = run_single_tile::<UpsamplePostOp>(TensorDesc::chw16c(16, 4, 16).expect("dst"));
        let acc = TensorAccessor3D::new(&dst).expect("accessor");
        let values = dst.to_f32();
        for h in 0..4 {
            assert_eq!(values[acc.offset(0, h, 0) as usize], 64.0);
            assert_eq!(values[acc.offset(0, h, 1) as usize], 64.0);
            assert_eq!(values[acc.offset(0, h, 2) as usize], 96.0);
        }
        assert_eq!(UpsamplePostOp::POST_OP, PostOp::Upsample);
    }

    fn irregular(index: usize, scale: f32) -> f32 {
        ((index * 37 % 101) as f32 - 50.0) / scale
    }

    #[test]
    fn accumulation_rounds_in_tap_then_lane_order() {
        let (channels, height, width) = (16, 2, 8);
        let src_plain = PlanarTensor::from_fn(channels, height, width, |c, h, w| {
            irregular((c * height + h) * width + w, 7.0)
        })
        .expect("src");
        let weights: Vec<f32> = (0..channels * channels * 9)
            .map(|i| irregular(i + 11, 13.0))
            .collect();
        let bias: Vec<f32> = (0..channels).map(|o| irregular(o + 3, 5.0)).collect();

        let src = reorder::chw_to_chw16c(&src_plain).expect("src");
        let weight = reorder::oihw_to_oihw16i16o(&weights, channels, channels).expect("weight");
        let bias_tensor = reorder::bias_from_f32(&bias).expect("bias");
        let dst = Tensor::zeros(TensorDesc::chw16c(channels, height, width).expect("dst"))
            .expect("dst");
        run_tile::<NoPostOp>(&src, &weight, &bias_tensor, &dst);
        let actual = reorder::chw16c_to_chw(&dst).expect("read back");

        let to_half = f16::from_f32;
        let input = |c: usize, h: isize, w: isize| {
            if h < 0 || w < 0 || h >= height as isize || w >= width as isize {
                f16::ZERO
            } else {
                to_half(src_plain.get(c, h as usize, w as usize))
            }
        };
        for o in 0..channels {
            for h in 0..height {
                for w in 0..width {
                    let mut acc = f16::ZERO;
                    for kh in 0..3 {
                        for kw in 0..3 {
                            for i in 0..channels {
                                let x = input(i, (h + kh) as isize - 1, (w + kw) as isize - 1);
                                let tap = weights[((o * channels + i) * 3 + kh) * 3 + kw];
                                acc += x * to_half(tap);
                            }
                        }
                    }
                    acc += to_half(bias[o]);
                    if acc < f16::ZERO {
                        acc = f16::ZERO;
                    }
                    assert_eq!(actual.get(o, h, w), acc.to_f32(), "({o}, {h}, {w})");
                }
            }
        }
    }
}
