//! Fixed-width half-precision vectors and lane masks.
//!
//! The tile kernel is written against these types so that its data flow
//! (row registers, weight matrices, predicated lanes) stays explicit. All
//! arithmetic is performed lane by lane in `f16`, rounding after every
//! operation exactly as a native half-precision SIMD unit would.

use half::f16;
use std::ops::{Add, AddAssign, Index, IndexMut};

/// `N` lanes of `f16`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(transparent)]
pub struct Vector<const N: usize>([f16; N]);

impl<const N: usize> Vector<N> {
    pub const ZERO: Self = Self([f16::ZERO; N]);

    pub fn splat(value: f16) -> Self {
        Self([value; N])
    }

    pub fn from_array(lanes: [f16; N]) -> Self {
        Self(lanes)
    }

    pub fn as_slice(&self) -> &[f16] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [f16] {
        &mut self.0
    }

    /// Copy `M` consecutive lanes starting at `start`.
    pub fn block<const M: usize>(&self, start: usize) -> Vector<M> {
        let mut out = Vector::<M>::ZERO;
        out.0.copy_from_slice(&self.0[start..start + M]);
        out
    }

    /// Overwrite `M` consecutive lanes starting at `start`.
    pub fn set_block<const M: usize>(&mut self, start: usize, value: &Vector<M>) {
        self.0[start..start + M].copy_from_slice(&value.0);
    }

    /// `self[start..start + M] += scalar * rhs`, one rounding per multiply and add.
    pub fn mul_add_block<const M: usize>(&mut self, start: usize, scalar: f16, rhs: &Vector<M>) {
        for (acc, &w) in self.0[start..start + M].iter_mut().zip(rhs.0.iter()) {
            *acc += scalar * w;
        }
    }

    /// Repeat the whole vector to fill `M` lanes (`M` must be a multiple of `N`).
    pub fn replicate<const M: usize>(&self) -> Vector<M> {
        const { assert!(N > 0 && M % N == 0, "replicate width must be a multiple") };
        let mut out = Vector::<M>::ZERO;
        for chunk in out.0.chunks_exact_mut(N) {
            chunk.copy_from_slice(&self.0);
        }
        out
    }

    /// Lane-wise maximum.
    pub fn max(&self, other: &Self) -> Self {
        let mut out = *self;
        for (lhs, &rhs) in out.0.iter_mut().zip(other.0.iter()) {
            *lhs = max_lane(*lhs, rhs);
        }
        out
    }

    /// Lane-wise `max(x, 0)`.
    pub fn relu(&self) -> Self {
        self.max(&Self::ZERO)
    }
}

impl<const N: usize> Default for Vector<N> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const N: usize> Index<usize> for Vector<N> {
    type Output = f16;

    fn index(&self, index: usize) -> &f16 {
        &self.0[index]
    }
}

impl<const N: usize> IndexMut<usize> for Vector<N> {
    fn index_mut(&mut self, index: usize) -> &mut f16 {
        &mut self.0[index]
    }
}

impl<const N: usize> Add for Vector<N> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl<const N: usize> AddAssign for Vector<N> {
    fn add_assign(&mut self, rhs: Self) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0) {
            *lhs += rhs;
        }
    }
}

fn max_lane(lhs: f16, rhs: f16) -> f16 {
    if rhs > lhs { rhs } else { lhs }
}

/// `N` boolean lane predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask<const N: usize>([bool; N]);

impl<const N: usize> Mask<N> {
    /// Lanes `i` with `lower <= i * step < upper`.
    pub fn in_range(step: isize, lower: isize, upper: isize) -> Self {
        Self(std::array::from_fn(|lane| {
            let value = lane as isize * step;
            value >= lower && value < upper
        }))
    }

    pub fn lane(&self, index: usize) -> bool {
        self.0[index]
    }
}
