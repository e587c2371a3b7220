//! CPU execution engine for work-group kernels.
//!
//! Kernels are closures invoked once per work-item of a 3-D (or N-D) grid.
//! The engine owns a dedicated `rayon` pool and a dispatcher thread that
//! drains submissions in order: a kernel starts only after the previous one
//! has finished. Inside one kernel, work-groups are distributed over the pool
//! and the items of one group run back to back on the same thread.
//! Submission is asynchronous and [`CpuEngine::wait`] is the only host-side
//! completion fence.

mod work;

pub use work::{WorkDim, WorkGroupItem};

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, SendError},
    },
    thread,
};

use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;

/// CPU instruction set detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArch {
    Unknown,
    Sse2,
    Sse41,
    Avx2,
    Avx512,
    Neon,
}

impl CpuArch {
    /// Detect the best instruction set supported by the running CPU.
    pub fn detect() -> Self {
        detect_arch()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CpuArch::Unknown => "unknown",
            CpuArch::Sse2 => "SSE2",
            CpuArch::Sse41 => "SSE4.1",
            CpuArch::Avx2 => "AVX2",
            CpuArch::Avx512 => "AVX-512",
            CpuArch::Neon => "NEON",
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_arch() -> CpuArch {
    if is_x86_feature_detected!("avx512f")
        && is_x86_feature_detected!("avx512bw")
        && is_x86_feature_detected!("avx512vl")
    {
        CpuArch::Avx512
    } else if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        CpuArch::Avx2
    } else if is_x86_feature_detected!("sse4.1") {
        CpuArch::Sse41
    } else if is_x86_feature_detected!("sse2") {
        CpuArch::Sse2
    } else {
        CpuArch::Unknown
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_arch() -> CpuArch {
    CpuArch::Neon
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_arch() -> CpuArch {
    CpuArch::Unknown
}

/// Construction options for a [`CpuEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Worker thread count; `0` uses one thread per logical CPU.
    pub num_threads: usize,
}

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build engine thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to start engine dispatcher: {0}")]
    Dispatcher(#[source] std::io::Error),
    #[error("unknown device parameter '{0}'")]
    UnknownParameter(String),
    #[error("device parameter '{name}' is read-only")]
    ReadOnlyParameter { name: String },
    #[error("device parameter '{name}' cannot be changed after the device is committed")]
    AlreadyCommitted { name: String },
    #[error("invalid value {value} for device parameter '{name}'")]
    InvalidParameterValue { name: String, value: i64 },
    #[error("device has not been committed")]
    NotCommitted,
    #[error("kernel '{kernel}' panicked: {message}")]
    KernelPanicked { kernel: String, message: String },
}

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Executes work-group kernels, in submission order, on a dedicated thread pool.
pub struct CpuEngine {
    id: u64,
    name: String,
    arch: CpuArch,
    pool: Arc<rayon::ThreadPool>,
    queue: mpsc::Sender<Job>,
    tracker: Arc<SubmissionTracker>,
}

impl fmt::Debug for CpuEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuEngine")
            .field("name", &self.name)
            .field("arch", &self.arch)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl CpuEngine {
    /// Create an engine with its own worker pool.
    pub fn new(options: &EngineOptions) -> Result<Arc<Self>, EngineError> {
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.num_threads)
                .thread_name(|index| format!("denoise-worker-{index}"))
                .build()?,
        );
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);

        // The dispatcher exits once the engine is dropped and the queue is drained.
        let (queue, jobs) = mpsc::channel::<Job>();
        let dispatch_pool = Arc::clone(&pool);
        thread::Builder::new()
            .name(format!("denoise-dispatch-{id}"))
            .spawn(move || {
                for job in jobs {
                    dispatch_pool.install(job);
                }
            })
            .map_err(EngineError::Dispatcher)?;

        let arch = CpuArch::detect();
        let threads = pool.current_num_threads();
        let name = format!("CPU engine ({arch}, {threads} threads)");
        info!(target: "denoise::engine", "Created {name}");
        Ok(Arc::new(Self {
            id,
            name,
            arch,
            pool,
            queue,
            tracker: Arc::new(SubmissionTracker::default()),
        }))
    }

    /// Process-unique identifier of this engine's queue.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> CpuArch {
        self.arch
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `kernel` for every work-item of `groups * local` and return immediately.
    ///
    /// Kernels run one at a time in submission order, so a kernel reading the
    /// output of an earlier one needs no fence in between. Each work-group runs
    /// on a single worker thread; the items inside a group run in row-major
    /// order of their local ids. The kernel is dropped before its completion
    /// is signalled. Host visibility of its writes is only guaranteed after
    /// [`Self::wait`].
    pub fn submit_kernel<K>(&self, label: &str, groups: WorkDim<3>, local: WorkDim<3>, kernel: K)
    where
        K: Fn(&WorkGroupItem<3>) + Send + Sync + 'static,
    {
        let global = groups * local;
        debug!(
            target: "denoise::engine",
            "Submitting {label}: groups={groups} local={local} global={global}"
        );

        self.tracker.begin();
        let tracker = Arc::clone(&self.tracker);
        let label = label.to_string();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (0..groups.product()).into_par_iter().for_each(|group_index| {
                    let group_id = groups.unflatten(group_index);
                    for local_index in 0..local.product() {
                        let local_id = local.unflatten(local_index);
                        kernel(&WorkGroupItem::new(group_id, local_id, local, global));
                    }
                });
            }));
            drop(kernel);
            let failure = outcome.err().map(|payload| EngineError::KernelPanicked {
                kernel: label,
                message: panic_message(payload.as_ref()),
            });
            tracker.complete(failure);
        });

        if let Err(SendError(job)) = self.queue.send(job) {
            // Only reachable if the dispatcher thread died; earlier kernels
            // have all completed by then, so running inline keeps the order.
            warn!(target: "denoise::engine", "Dispatcher unavailable, running inline");
            self.pool.install(job);
        }
    }

    /// Block until every submitted kernel has finished.
    ///
    /// Returns the first failure recorded since the previous `wait`.
    pub fn wait(&self) -> Result<(), EngineError> {
        self.tracker.wait_idle()
    }
}

#[derive(Default)]
struct SubmissionTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

#[derive(Default)]
struct TrackerState {
    pending: usize,
    failure: Option<EngineError>,
}

impl SubmissionTracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        self.lock().pending += 1;
    }

    fn complete(&self, failure: Option<EngineError>) {
        let mut state = self.lock();
        state.pending -= 1;
        if state.failure.is_none() {
            state.failure = failure;
        }
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

const PARAM_NUM_THREADS: &str = "numThreads";
const PARAM_VERSION_MAJOR: &str = "versionMajor";
const PARAM_VERSION_MINOR: &str = "versionMinor";
const PARAM_VERSION_PATCH: &str = "versionPatch";

/// Configurable handle that produces a [`CpuEngine`] once committed.
///
/// Parameters are set by name before [`CpuDevice::commit`]; afterwards the
/// writable ones are frozen.
#[derive(Debug, Default)]
pub struct CpuDevice {
    options: EngineOptions,
    engine: Option<Arc<CpuEngine>>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch() -> CpuArch {
        CpuArch::detect()
    }

    pub fn get_int(&self, name: &str) -> Result<i64, EngineError> {
        match name {
            PARAM_NUM_THREADS => Ok(match &self.engine {
                Some(engine) => engine.num_threads() as i64,
                None => self.options.num_threads as i64,
            }),
            PARAM_VERSION_MAJOR => Ok(version_component(env!("CARGO_PKG_VERSION_MAJOR"))),
            PARAM_VERSION_MINOR => Ok(version_component(env!("CARGO_PKG_VERSION_MINOR"))),
            PARAM_VERSION_PATCH => Ok(version_component(env!("CARGO_PKG_VERSION_PATCH"))),
            other => Err(EngineError::UnknownParameter(other.to_string())),
        }
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> Result<(), EngineError> {
        match name {
            PARAM_NUM_THREADS => {
                if self.engine.is_some() {
                    return Err(EngineError::AlreadyCommitted {
                        name: name.to_string(),
                    });
                }
                self.options.num_threads =
                    usize::try_from(value).map_err(|_| EngineError::InvalidParameterValue {
                        name: name.to_string(),
                        value,
                    })?;
                Ok(())
            }
            PARAM_VERSION_MAJOR | PARAM_VERSION_MINOR | PARAM_VERSION_PATCH => {
                Err(EngineError::ReadOnlyParameter {
                    name: name.to_string(),
                })
            }
            other => Err(EngineError::UnknownParameter(other.to_string())),
        }
    }

    /// Build the engine from the current parameters (idempotent).
    pub fn commit(&mut self) -> Result<Arc<CpuEngine>, EngineError> {
        if let Some(engine) = &self.engine {
            return Ok(Arc::clone(engine));
        }
        let engine = CpuEngine::new(&self.options)?;
        self.engine = Some(Arc::clone(&engine));
        Ok(engine)
    }

    pub fn wait(&self) -> Result<(), EngineError> {
        self.engine
            .as_ref()
            .ok_or(EngineError::NotCommitted)?
            .wait()
    }
}

fn version_component(raw: &str) -> i64 {
    raw.parse().unwrap_or(0)
}
