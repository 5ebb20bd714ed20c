//! Execution context for the hit finder.
//!
//! A [`DeviceContext`] owns the worker pool every parallel stage of one
//! chain runs on. It is created by `set_parameters` and torn down by
//! `finalize`, so its lifetime is tied to the chain instance and not to
//! process-global state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Execution backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Single worker thread.
    Serial,
    /// Thread pool.
    Parallel {
        /// Worker count; `None` uses one per core.
        threads: Option<usize>,
    },
}

impl Default for Backend {
    fn default() -> Self {
        Self::Parallel { threads: None }
    }
}

impl Backend {
    /// Backend name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Parallel { .. } => "parallel",
        }
    }
}

/// Worker pool bound to one chain instance.
pub struct DeviceContext {
    backend: Backend,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend)
            .field("n_workers", &self.n_workers())
            .finish()
    }
}

impl DeviceContext {
    /// Starts the worker pool for `backend`.
    ///
    /// # Errors
    /// Returns [`Error::DeviceError`] if the pool cannot be created.
    pub fn new(backend: Backend) -> Result<Self> {
        let threads = match backend {
            Backend::Serial => 1,
            Backend::Parallel { threads } => threads.unwrap_or(0),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sts-hitfinder-{i}"))
            .build()
            .map_err(|e| Error::DeviceError(e.to_string()))?;
        Ok(Self { backend, pool })
    }

    /// Runs `op` inside the pool; nested rayon calls use its workers.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Number of workers.
    #[must_use]
    pub fn n_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The backend this context was created for.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}
