//! Lifecycle controller
//!
//! Owns the model state and drives loading on a background thread. State
//! transitions:
//!
//! ```text
//! Unloaded ──claim──▶ Loading ──ok──▶ Ready
//!                        │  ▲
//!                  error │  │ backoff, attempts left
//!                        ▼  │
//!                   (retry loop) ──exhausted──▶ Failed
//! ```
//!
//! The state lock only guards transitions; loading and inference never hold it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::backoff::BackoffPolicy;
use super::loader::{LoadedModel, ModelLoader};
use super::state::{Availability, ModelState, StatusSnapshot};
use crate::utils::error::{truncate_message, Error, Result, MAX_ERROR_LEN};

/// Name of the background loading thread
pub const LOADER_THREAD_NAME: &str = "model-loader";

/// Load trigger and retry settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Start loading at process start
    pub eager_load: bool,
    /// Start loading on the first inference request
    pub lazy_load: bool,
    /// Delay before an eager load starts
    pub settle_delay_secs: u64,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub oom_multiplier: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            eager_load: false,
            lazy_load: true,
            settle_delay_secs: 5,
            max_attempts: 3,
            backoff_secs: 5,
            oom_multiplier: 3,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if !self.eager_load && !self.lazy_load {
            warn!("Neither eager nor lazy loading is enabled; the model will never load");
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(self.backoff_secs),
            oom_multiplier: self.oom_multiplier,
            max_attempts: self.max_attempts,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Wakeable shutdown flag
#[derive(Default)]
pub struct ShutdownSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        let mut flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        self.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`; returns true if shutdown was triggered
    pub fn wait(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (flag, _) = self
            .cond
            .wait_timeout_while(flag, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *flag
    }
}

#[derive(Default)]
struct Inner {
    state: ModelState,
    model: Option<Arc<LoadedModel>>,
    load_attempts: u32,
    consecutive_failures: u32,
    last_error: Option<String>,
    architecture: Option<String>,
    loading_started_at: Option<chrono::DateTime<Utc>>,
    ready_at: Option<chrono::DateTime<Utc>>,
}

/// Single owner of the served model's lifecycle
pub struct LifecycleController {
    inner: Mutex<Inner>,
    loader: Arc<dyn ModelLoader>,
    config: LifecycleConfig,
    shutdown: ShutdownSignal,
}

impl LifecycleController {
    pub fn new(loader: Arc<dyn ModelLoader>, config: LifecycleConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            loader,
            config,
            shutdown: ShutdownSignal::default(),
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::StatePoisoned(format!("model state lock poisoned: {}", e)))
    }

    /// The loader thread keeps going on a poisoned lock; state is plain data
    fn lock_for_update(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start loading if nothing has started yet; returns true if this call started it
    pub fn request_load(self: &Arc<Self>) -> bool {
        self.claim_and_spawn(Duration::ZERO)
    }

    /// Start the eager load when configured; waits the settle delay first
    pub fn start_eager(self: &Arc<Self>) -> bool {
        if !self.config.eager_load {
            return false;
        }
        info!(
            "Eager loading enabled, loading in background after {}s",
            self.config.settle_delay_secs
        );
        self.claim_and_spawn(self.config.settle_delay())
    }

    fn claim_and_spawn(self: &Arc<Self>, settle_delay: Duration) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }
        {
            let mut inner = self.lock_for_update();
            if inner.state != ModelState::Unloaded {
                return false;
            }
            inner.state = ModelState::Loading;
            inner.loading_started_at = Some(Utc::now());
        }

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(LOADER_THREAD_NAME.to_string())
            .spawn(move || this.run(settle_delay));

        if let Err(e) = spawned {
            let message = truncate_message(&format!("failed to start loader thread: {}", e), MAX_ERROR_LEN);
            error!("{}", message);
            let mut inner = self.lock_for_update();
            inner.last_error = Some(message.clone());
            inner.state = ModelState::Failed { error: message };
            return false;
        }
        true
    }

    fn run(&self, settle_delay: Duration) {
        if !settle_delay.is_zero() && self.shutdown.wait(settle_delay) {
            info!("Shutdown requested before model load started");
            return;
        }

        let policy = self.config.backoff_policy();
        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested, no further load attempts");
                return;
            }

            let attempt = {
                let mut inner = self.lock_for_update();
                inner.load_attempts += 1;
                inner.load_attempts
            };
            info!("Loading model (attempt {}/{})", attempt, policy.max_attempts);

            match self.attempt() {
                Ok(model) => {
                    let mut inner = self.lock_for_update();
                    inner.architecture = Some(model.architecture.clone());
                    inner.model = Some(Arc::new(model));
                    inner.consecutive_failures = 0;
                    inner.last_error = None;
                    inner.ready_at = Some(Utc::now());
                    inner.state = ModelState::Ready;
                    info!("Model loaded successfully after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => {
                    let message = e.bounded_message();
                    let failures = {
                        let mut inner = self.lock_for_update();
                        inner.consecutive_failures += 1;
                        inner.last_error = Some(message.clone());
                        if !policy.should_retry(inner.consecutive_failures) {
                            inner.state = ModelState::Failed {
                                error: message.clone(),
                            };
                        }
                        inner.consecutive_failures
                    };

                    if !policy.should_retry(failures) {
                        error!(
                            "Model load failed permanently after {} attempt(s): {}",
                            attempt, message
                        );
                        return;
                    }

                    let delay = policy.delay(failures, e.kind());
                    warn!(
                        "Model load attempt {} failed ({:?}): {}. Retrying in {}s",
                        attempt,
                        e.kind(),
                        message,
                        delay.as_secs()
                    );
                    if self.shutdown.wait(delay) {
                        info!("Shutdown requested during backoff, no further load attempts");
                        return;
                    }
                }
            }
        }
    }

    /// One attempt; a panicking loader counts as a failed attempt
    fn attempt(&self) -> Result<LoadedModel> {
        match catch_unwind(AssertUnwindSafe(|| self.loader.load())) {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::Other(format!("model loader panicked: {}", detail)))
            }
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Result<StatusSnapshot> {
        let inner = self.lock()?;
        Ok(StatusSnapshot {
            state: inner.state.clone(),
            load_attempts: inner.load_attempts,
            last_error: inner.last_error.clone(),
            architecture: inner.architecture.clone(),
            loading_started_at: inner.loading_started_at,
            ready_at: inner.ready_at,
        })
    }

    /// Current availability without triggering a load
    pub fn availability(&self) -> Result<Availability> {
        let inner = self.lock()?;
        Ok(match (&inner.state, &inner.model) {
            (ModelState::Ready, Some(model)) => Availability::Ready(Arc::clone(model)),
            (ModelState::Loading, _) | (ModelState::Ready, None) => Availability::Loading,
            (ModelState::Failed { error }, _) => Availability::Failed(error.clone()),
            (ModelState::Unloaded, _) => Availability::NotLoaded,
        })
    }

    /// Availability for an inference request, starting a lazy load if needed
    pub fn ensure_available(self: &Arc<Self>) -> Result<Availability> {
        let availability = self.availability()?;
        if matches!(availability, Availability::NotLoaded) && self.config.lazy_load {
            if self.request_load() {
                info!("First inference request received, loading model in background");
            }
            return self.availability();
        }
        Ok(availability)
    }

    /// Stop scheduling load attempts and wake any backoff sleep
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Poison the state lock so readers take their error paths
    #[cfg(any(test, feature = "test-util"))]
    #[doc(hidden)]
    pub fn poison_state_lock(&self) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = self.inner.lock();
            panic!("state lock poisoned for testing");
        }));
    }
}
