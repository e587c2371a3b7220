use std::{
    fmt,
    ops::{Div, Index, IndexMut, Mul},
};

/// Extent of an N-dimensional work grid.
///
/// Arithmetic is component-wise, matching how work-group grids and local
/// grids are combined when a kernel is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkDim<const N: usize>([usize; N]);

impl<const N: usize> WorkDim<N> {
    pub const fn new(dims: [usize; N]) -> Self {
        Self(dims)
    }

    /// Total number of items covered by the grid.
    pub fn product(&self) -> usize {
        self.0.iter().product()
    }

    pub fn dims(&self) -> [usize; N] {
        self.0
    }

    /// Convert a linear index into per-axis coordinates (last axis fastest).
    pub fn unflatten(&self, mut index: usize) -> [usize; N] {
        let mut coords = [0usize; N];
        for axis in (0..N).rev() {
            let extent = self.0[axis];
            coords[axis] = index % extent;
            index /= extent;
        }
        coords
    }

    /// Returns `true` when every axis of `self` is a multiple of `other`.
    pub fn is_divisible_by(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(&lhs, &rhs)| rhs != 0 && lhs % rhs == 0)
    }
}

impl<const N: usize> From<[usize; N]> for WorkDim<N> {
    fn from(value: [usize; N]) -> Self {
        Self(value)
    }
}

impl<const N: usize> Index<usize> for WorkDim<N> {
    type Output = usize;

    fn index(&self, index: usize) -> &usize {
        &self.0[index]
    }
}

impl<const N: usize> IndexMut<usize> for WorkDim<N> {
    fn index_mut(&mut self, index: usize) -> &mut usize {
        &mut self.0[index]
    }
}

impl<const N: usize> Mul for WorkDim<N> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (lhs, rhs) in out.iter_mut().zip(rhs.0) {
            *lhs *= rhs;
        }
        Self(out)
    }
}

impl<const N: usize> Div for WorkDim<N> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (lhs, rhs) in out.iter_mut().zip(rhs.0) {
            *lhs /= rhs;
        }
        Self(out)
    }
}

impl<const N: usize> fmt::Display for WorkDim<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axis, extent) in self.0.iter().enumerate() {
            if axis > 0 {
                f.write_str("x")?;
            }
            write!(f, "{extent}")?;
        }
        Ok(())
    }
}

/// Identity of one work-item inside a dispatched grid.
#[derive(Debug, Clone, Copy)]
pub struct WorkGroupItem<const N: usize> {
    group_id: [usize; N],
    local_id: [usize; N],
    local_size: WorkDim<N>,
    global_size: WorkDim<N>,
}

impl<const N: usize> WorkGroupItem<N> {
    pub fn new(
        group_id: [usize; N],
        local_id: [usize; N],
        local_size: WorkDim<N>,
        global_size: WorkDim<N>,
    ) -> Self {
        Self {
            group_id,
            local_id,
            local_size,
            global_size,
        }
    }

    pub fn global_id(&self, axis: usize) -> usize {
        self.group_id[axis] * self.local_size[axis] + self.local_id[axis]
    }

    pub fn local_id(&self, axis: usize) -> usize {
        self.local_id[axis]
    }

    pub fn group_id(&self, axis: usize) -> usize {
        self.group_id[axis]
    }

    pub fn global_range(&self, axis: usize) -> usize {
        self.global_size[axis]
    }

    pub fn local_range(&self, axis: usize) -> usize {
        self.local_size[axis]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn componentwise_arithmetic() {
        let global = WorkDim::new([4, 6, 8]);
        let local = WorkDim::new([2, 3, 4]);
        assert_eq!(global / local, WorkDim::new([2, 2, 2]));
        assert_eq!((global / local) * local, global);
        assert!(global.is_divisible_by(&local));
        assert!(!global.is_divisible_by(&WorkDim::new([3, 1, 1])));
        assert_eq!(global.product(), 192);
        assert_eq!(global.to_string(), "4x6x8");
    }

    #[test]
    fn unflatten_is_row_major() {
        let grid = WorkDim::new([2, 3, 4]);
        assert_eq!(grid.unflatten(0), [0, 0, 0]);
        assert_eq!(grid.unflatten(1), [0, 0, 1]);
        assert_eq!(grid.unflatten(4), [0, 1, 0]);
        assert_eq!(grid.unflatten(12), [1, 0, 0]);
        assert_eq!(grid.unflatten(23), [1, 2, 3]);
    }

    #[test]
    fn global_id_combines_group_and_local() {
        let item = WorkGroupItem::new(
            [1, 2, 0],
            [1, 0, 3],
            WorkDim::new([2, 2, 4]),
            WorkDim::new([4, 6, 4]),
        );
        assert_eq!(item.global_id(0), 3);
        assert_eq!(item.global_id(1), 4);
        assert_eq!(item.global_id(2), 3);
        assert_eq!(item.local_id(2), 3);
        assert_eq!(item.group_id(1), 2);
        assert_eq!(item.global_range(1), 6);
        assert_eq!(item.local_range(2), 4);
    }
}
