//! Tile row transfers between tensor memory and row registers.
//!
//! Rows that lie fully inside the tensor move with one contiguous access.
//! Rows that straddle an edge fall back to per-column (loads) or per-chunk
//! (stores) predicated accesses so that padding reads as zero and nothing is
//! written past the destination width.

use crate::simd::{Mask, Vector};
use crate::tensor::{BLOCK_C, TensorAccessor3D};

/// Output rows per tile.
pub const BLOCK_OH: usize = 2;
/// Output columns per tile.
pub const BLOCK_OW: usize = 8;
/// Input columns per tile row, including the 3-wide kernel's halo.
pub const BLOCK_IW: usize = BLOCK_OW + 2;

/// Lanes of one input row register.
pub(crate) const IN_ROW: usize = BLOCK_IW * BLOCK_C;
/// Lanes of one accumulator row.
pub(crate) const ROW: usize = BLOCK_OW * BLOCK_C;
/// Lanes of one `BLOCK_C x BLOCK_C` weight block.
pub(crate) const WEIGHT_BLOCK: usize = BLOCK_C * BLOCK_C;

/// Load `W` pixels of channel block `ic` from row `ih`, starting at column `iw`.
///
/// Rows outside `[0, H)` and columns outside `[0, W)` read as zero.
pub(crate) fn load_row<const N: usize, const W: usize>(
    src: &TensorAccessor3D,
    ic: usize,
    ih: isize,
    iw: isize,
) -> Vector<N> {
    const { assert!(N == W * BLOCK_C, "row lanes must cover whole pixels") };

    if ih < 0 || ih >= src.h as isize {
        return Vector::ZERO;
    }

    let width = src.w as isize;
    if iw >= 0 && iw + W as isize <= width {
        return src.load(src.offset(ic, ih, iw) as usize);
    }

    let valid = Mask::<W>::in_range(1, -iw, width - iw);
    let mut row = Vector::<N>::ZERO;
    for col in 0..W {
        if valid.lane(col) {
            let offset = src.offset(ic, ih, iw + col as isize) as usize;
            row.set_block::<BLOCK_C>(col * BLOCK_C, &src.load(offset));
        }
    }
    row
}

/// Store a row of `N / BLOCK_C` pixels at `(oc, oh, ow)`.
///
/// The row is split into `CHUNKS` chunks of `K` pixels when it overhangs the
/// right edge; a chunk is written only if its first column lies inside the
/// destination. Callers keep `dst.w - ow` a multiple of `K` and check `oh`.
pub(crate) fn store_row<const K: usize, const N: usize, const CHUNKS: usize>(
    dst: &TensorAccessor3D,
    row: &Vector<N>,
    oc: usize,
    oh: usize,
    ow: usize,
) {
    const { assert!(N == CHUNKS * K * BLOCK_C, "chunks must tile the row exactly") };

    let base = dst.offset(oc, oh as isize, ow as isize);
    if ow + N / BLOCK_C <= dst.w {
        dst.store(base as usize, row);
        return;
    }

    let chunk_lanes = K * BLOCK_C;
    let writable = Mask::<CHUNKS>::in_range(K as isize, 0, dst.w as isize - ow as isize);
    for chunk in 0..CHUNKS {
        if writable.lane(chunk) {
            let start = chunk * chunk_lanes;
            let lanes = &row.as_slice()[start..start + chunk_lanes];
            dst.store_lanes(base as usize + start, lanes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Tensor, TensorDesc};
    use half::f16;

    fn numbered(channels: usize, height: usize, width: usize) -> Tensor {
        let desc = TensorDesc::chw16c(channels, height, width).expect("desc");
        let data: Vec<f32> = (0..desc.num_elements()).map(|i| (i + 1) as f32).collect();
        Tensor::from_f32(desc, &data).expect("tensor")
    }

    #[test]
    fn vertical_padding_reads_zero() {
        let tensor = numbered(16, 2, 12);
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        let above: Vector<IN_ROW> = load_row::<IN_ROW, BLOCK_IW>(&acc, 0, -1, 0);
        let below: Vector<IN_ROW> = load_row::<IN_ROW, BLOCK_IW>(&acc, 0, 2, 0);
        assert_eq!(above, Vector::ZERO);
        assert_eq!(below, Vector::ZERO);
    }

    #[test]
    fn fast_path_matches_contiguous_memory() {
        let tensor = numbered(16, 2, 12);
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        let row: Vector<IN_ROW> = load_row::<IN_ROW, BLOCK_IW>(&acc, 0, 1, 2);
        let start = acc.offset(0, 1, 2) as usize;
        assert_eq!(row.as_slice(), &tensor.to_vec()[start..start + IN_ROW]);
    }

    #[test]
    fn slow_path_masks_halo_columns() {
        let tensor = numbered(16, 1, 4);
        let acc = TensorAccessor3D::new(&tensor).expect("accessor");
        let row: Vector<IN_ROW> = load_row::<IN_ROW, BLOCK_IW>(&acc, 0, 0, -1);
        // Column 0 of the row register is the left halo.
        assert!(row.as_slice()[..BLOCK_C].iter().all(|v| *v == f16::ZERO));
        // Columns 1..=4 hold pixels 0..4.
        assert_eq!(row[BLOCK_C], f16::from_f32(1.0));
        assert_eq!(row[4 * BLOCK_C + 15], f16::from_f32(64.0));
        // Everything past the right edge is zero.
        assert!(row.as_slice()[5 * BLOCK_C..].iter().all(|v| *v == f16::ZERO));
    }

    #[test]
    fn overhanging_store_stops_at_the_edge() {
        let desc = TensorDesc::chw16c(16, 1, 11).expect("desc");
        let dst = Tensor::zeros(desc).expect("alloc");
        let acc = TensorAccessor3D::new(&dst).expect("accessor");
        let row = Vector::<ROW>::splat(f16::ONE);

        store_row::<1, ROW, BLOCK_OW>(&acc, &row, 0, 0, 8);
        let written: Vec<f16> = dst.to_vec();
        assert!(written[..8 * BLOCK_C].iter().all(|v| *v == f16::ZERO));
        assert!(written[8 * BLOCK_C..].iter().all(|v| *v == f16::ONE));
    }

    #[test]
    fn paired_chunks_cover_even_widths() {
        let desc = TensorDesc::chw16c(16, 1, 6).expect("desc");
        let dst = Tensor::zeros(desc).expect("alloc");
        let acc = TensorAccessor3D::new(&dst).expect("accessor");
        let row = Vector::<{ 2 * ROW }>::splat(f16::ONE);

        store_row::<2, { 2 * ROW }, BLOCK_OW>(&acc, &row, 0, 0, 0);
        assert!(dst.to_vec().iter().all(|v| *v == f16::ONE));
    }
}
