use super::desc::{DataType, TensorDesc, TensorError};

use half::f16;
use std::{
    cell::UnsafeCell,
    fmt, ptr,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// Shared half-precision tensor memory.
///
/// Like device memory, a tensor is a handle: clones share the same storage
/// and kernels write through it concurrently, each work-item touching a
/// disjoint region. Every submitted kernel holds a lease on its operands
/// until it has run. Host-side reads and writes ([`Tensor::to_vec`],
/// [`Tensor::write`], [`Tensor::fill`]) block while any lease is
/// outstanding, so they always observe the results of earlier submissions.
pub struct Tensor {
    inner: Arc<TensorInner>,
}

struct TensorInner {
    desc: TensorDesc,
    storage: TensorStorage,
    leases: LeaseState,
}

/// Kernel leases on one tensor. All outstanding leases belong to the same
/// engine queue, whose in-order execution keeps their kernels apart.
#[derive(Default)]
struct LeaseState {
    holders: Mutex<Leases>,
    released: Condvar,
}

#[derive(Default)]
struct Leases {
    count: usize,
    queue: u64,
}

impl LeaseState {
    fn lock(&self) -> MutexGuard<'_, Leases> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a>(
        &'a self,
        guard: MutexGuard<'a, Leases>,
        blocked: impl FnMut(&mut Leases) -> bool,
    ) -> MutexGuard<'a, Leases> {
        self.released
            .wait_while(guard, blocked)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a tensor reserved for a submitted kernel; released on drop.
pub(crate) struct TensorLease {
    tensor: Tensor,
}

impl Drop for TensorLease {
    fn drop(&mut self) {
        let state = &self.tensor.inner.leases;
        let mut leases = state.lock();
        leases.count -= 1;
        if leases.count == 0 {
            state.released.notify_all();
        }
    }
}

struct TensorStorage {
    cells: Box<[UnsafeCell<f16>]>,
}

// SAFETY: all access goes through raw pointers. Kernel accesses happen under a
// lease, one kernel at a time, and work-items write disjoint elements. Host
// access excludes every lease through `LeaseState`.
unsafe impl Sync for TensorStorage {}

impl TensorStorage {
    fn zeroed(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(f16::ZERO)).collect(),
        }
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    fn as_ptr(&self) -> *mut f16 {
        UnsafeCell::raw_get(self.cells.as_ptr())
    }
}

impl Tensor {
    /// Allocate a zero-filled tensor.
    pub fn zeros(desc: TensorDesc) -> Result<Self, TensorError> {
        if desc.data_type() != DataType::Float16 {
            return Err(TensorError::UnsupportedDataType(desc.data_type()));
        }
        let storage = TensorStorage::zeroed(desc.num_elements());
        Ok(Self {
            inner: Arc::new(TensorInner {
                desc,
                storage,
                leases: LeaseState::default(),
            }),
        })
    }

    /// Allocate a tensor and copy `data` (already in the descriptor's layout) into it.
    pub fn from_data(desc: TensorDesc, data: &[f16]) -> Result<Self, TensorError> {
        let tensor = Self::zeros(desc)?;
        tensor.write(data)?;
        Ok(tensor)
    }

    /// Like [`Tensor::from_data`], rounding each `f32` to the nearest `f16`.
    pub fn from_f32(desc: TensorDesc, data: &[f32]) -> Result<Self, TensorError> {
        let halves: Vec<f16> = data.iter().copied().map(f16::from_f32).collect();
        Self::from_data(desc, &halves)
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.inner.desc
    }

    pub fn len(&self) -> usize {
        self.inner.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when both handles share the same storage.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reserve the tensor for a kernel submitted to engine queue `queue`.
    ///
    /// Blocks while kernels of a different queue still hold leases.
    pub(crate) fn lease(&self, queue: u64) -> TensorLease {
        let state = &self.inner.leases;
        let guard = state.lock();
        let mut leases = state.wait_while(guard, |l| l.count > 0 && l.queue != queue);
        leases.count += 1;
        leases.queue = queue;
        TensorLease {
            tensor: self.clone(),
        }
    }

    /// Wait until no kernel holds a lease. The returned guard keeps new
    /// leases out while the host touches the storage.
    fn host_access(&self) -> MutexGuard<'_, Leases> {
        let state = &self.inner.leases;
        let guard = state.lock();
        state.wait_while(guard, |l| l.count > 0)
    }

    /// Overwrite the whole tensor with `data` in physical order.
    pub fn write(&self, data: &[f16]) -> Result<(), TensorError> {
        if data.len() != self.len() {
            return Err(TensorError::LengthMismatch {
                expected: self.len(),
                actual: data.len(),
            });
        }
        let _access = self.host_access();
        // SAFETY: lengths match, `data` cannot alias tensor storage and no
        // kernel holds a lease while `_access` is alive.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr(), data.len()) };
        Ok(())
    }

    /// Set every element to `value`.
    pub fn fill(&self, value: f16) {
        let _access = self.host_access();
        let base = self.as_mut_ptr();
        for index in 0..self.len() {
            // SAFETY: index < len and no kernel holds a lease.
            unsafe { base.add(index).write(value) };
        }
    }

    /// Copy the tensor contents (physical order) to the host.
    pub fn to_vec(&self) -> Vec<f16> {
        let mut out = vec![f16::ZERO; self.len()];
        let _access = self.host_access();
        // SAFETY: `out` has exactly `len` elements and no kernel holds a lease.
        unsafe { ptr::copy_nonoverlapping(self.as_mut_ptr(), out.as_mut_ptr(), out.len()) };
        out
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.to_vec().into_iter().map(f16::to_f32).collect()
    }

    /// Raw little-endian bytes of the tensor in physical order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let values = self.to_vec();
        bytemuck::cast_slice::<f16, u8>(&values).to_vec()
    }

    /// Base pointer of the storage, used by accessors.
    pub(crate) fn as_mut_ptr(&self) -> *mut f16 {
        self.inner.storage.as_ptr()
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("desc", &self.desc().to_string())
            .finish()
    }
}
