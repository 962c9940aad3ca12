//! Inference backend contract and the bounded retry/timeout guard around it.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::class_map::ClassMap;
use crate::error::BackendError;

/// A synchronous classification oracle.
///
/// `predict` returns one class index per input pixel, in the input's frame.
pub trait InferenceBackend: Send + Sync {
    fn predict(&self, patch: &RgbImage, model: &str) -> Result<ClassMap, BackendError>;
}

/// The retry budget of one tile ran out.
#[derive(Debug, Clone)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: BackendError,
}

/// Per-call timeout and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per tile, including the first one.
    pub max_attempts: u32,
    /// Deadline of a single call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Some(Duration::from_secs(1000)),
            backoff: Duration::from_millis(500),
        }
    }
}

/// In-flight calls allowed when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 4;

/// Counting permits bounding the calls a backend sees at once.
#[derive(Debug)]
struct Permits {
    free: Mutex<usize>,
    freed: Condvar,
}

/// Held for the whole duration of one backend call, including calls the
/// caller has stopped waiting for.
struct Permit(Arc<Permits>);

impl Permits {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { free: Mutex::new(capacity.max(1)), freed: Condvar::new() })
    }

    /// Wait for a free slot, at most until `deadline`.
    fn acquire(self: &Arc<Self>, deadline: Option<Instant>) -> Option<Permit> {
        let mut free = self.free.lock();
        while *free == 0 {
            match deadline {
                Some(at) => {
                    if self.freed.wait_until(&mut free, at).timed_out() && *free == 0 {
                        return None;
                    }
                }
                None => self.freed.wait(&mut free),
            }
        }
        *free -= 1;
        Some(Permit(Arc::clone(self)))
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        *self.0.free.lock() += 1;
        self.0.freed.notify_one();
    }
}

/// Wraps a backend with the run's model name, timeout, retry budget and a
/// cap on concurrent calls.
///
/// A call that misses its deadline is abandoned, not interrupted: the worker
/// thread drains in the background and its late answer is dropped. It keeps
/// its permit until the backend returns, so retries never push the backend
/// past `capacity` calls.
#[derive(Clone)]
pub struct GuardedBackend {
    backend: Arc<dyn InferenceBackend>,
    model: Arc<str>,
    policy: RetryPolicy,
    permits: Arc<Permits>,
    capacity: usize,
}

impl GuardedBackend {
    pub fn new(backend: Arc<dyn InferenceBackend>, model: &str, policy: RetryPolicy) -> Self {
        Self {
            backend,
            model: Arc::from(model),
            policy,
            permits: Permits::new(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Bound concurrent backend calls to `capacity` (at least one).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self.permits = Permits::new(self.capacity);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Predict with retries; returns the last error once the budget is spent.
    pub fn predict(&self, patch: RgbImage) -> Result<ClassMap, Exhausted> {
        let patch = Arc::new(patch);
        let attempts = self.policy.max_attempts.max(1);
        let mut last = BackendError::Disconnected;
        for attempt in 1..=attempts {
            match self.call_once(Arc::clone(&patch)) {
                Ok(map) => return Ok(map),
                Err(e) => {
                    warn!(attempt, attempts, model = %self.model, error = %e, "inference attempt failed");
                    last = e;
                }
            }
            if attempt < attempts && !self.policy.backoff.is_zero() {
                thread::sleep(self.policy.backoff);
            }
        }
        Err(Exhausted { attempts, last })
    }

    fn call_once(&self, patch: Arc<RgbImage>) -> Result<ClassMap, BackendError> {
        let Some(timeout) = self.policy.timeout else {
            let _permit = self.permits.acquire(None);
            return self.backend.predict(&patch, &self.model);
        };

        // Waiting for a slot counts against the call's deadline.
        let deadline = Instant::now() + timeout;
        let permit = self.permits.acquire(Some(deadline)).ok_or(BackendError::Timeout(timeout))?;

        let (tx, rx) = mpsc::sync_channel(1);
        let backend = Arc::clone(&self.backend);
        let model = Arc::clone(&self.model);
        thread::Builder::new()
            .name("inference-call".into())
            .spawn(move || {
                let result = backend.predict(&patch, &model);
                drop(permit);
                // The receiver is gone if the deadline already passed.
                let _ = tx.send(result);
            })
            .map_err(|e| BackendError::Transport(format!("cannot spawn inference worker: {e}")))?;

        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BackendError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::Disconnected),
        }
    }
}
