use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hashbrown::HashSet;
use tokio::sync::{Notify, Semaphore};
use tracing_futures::Instrument;

use crate::config::BackgroundConfig;

/// A bounded, fire-and-forget executor for artifact generation.
///
/// Jobs are keyed, a key that is already queued or running is not
/// submitted again. Failures are logged and otherwise discarded.
#[derive(Clone)]
pub struct BackgroundWorker {
    inner: Arc<WorkerState>,
}

struct WorkerState {
    limiter: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    pending: AtomicUsize,
    max_pending: usize,
    idle: Notify,
}

impl WorkerState {
    fn finish(&self, key: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Releases the job's slot even if the job panics.
struct JobGuard {
    state: Arc<WorkerState>,
    key: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.state.finish(&self.key);
    }
}

impl BackgroundWorker {
    pub fn new(cfg: &BackgroundConfig) -> Self {
        Self {
            inner: Arc::new(WorkerState {
                limiter: Arc::new(Semaphore::new(cfg.max_concurrency.max(1))),
                in_flight: Mutex::new(HashSet::new()),
                pending: AtomicUsize::new(0),
                max_pending: cfg.max_pending.max(1),
                idle: Notify::new(),
            }),
        }
    }

    /// Schedules the job without waiting for it.
    ///
    /// Returns `false` if the job was dropped, either because the same key
    /// is already in flight or because the queue is full.
    pub fn submit<F>(&self, key: String, job: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if in_flight.contains(&key) {
                debug!("Skipping background job {}, already in flight", key);
                return false;
            }

            if self.inner.pending.load(Ordering::Acquire) >= self.inner.max_pending {
                warn!("Dropping background job {}, queue is full", key);
                return false;
            }

            in_flight.insert(key.clone());
            self.inner.pending.fetch_add(1, Ordering::AcqRel);
        }

        let span = info_span!("background", job = %key);
        let guard = JobGuard {
            state: self.inner.clone(),
            key,
        };

        tokio::spawn(
            async move {
                let _permit = match guard.state.limiter.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                if let Err(e) = job.await {
                    warn!("Background job {} failed: {:#}", guard.key, e);
                }
            }
            .instrument(span),
        );

        true
    }

    /// The number of jobs queued or running.
    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Waits for every submitted job to finish, giving up after `timeout`.
    ///
    /// Returns `true` if the worker went idle in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.pending() == 0 {
                    return;
                }

                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
