//! Bounded execution of blocking conversions.
//!
//! ## Why a semaphore and not a thread pool?
//!
//! Tokio's blocking pool already owns the threads; what it lacks is a bound.
//! A 900 DPI conversion can hold hundreds of megabytes, so the number of
//! conversions in flight is capped by a [`Semaphore`] with `max_concurrent`
//! permits. Requests beyond that wait in a queue that is itself bounded, by
//! length (`max_queued`) and by time (`queue_timeout`); past either bound the
//! request fails [`ServiceError::Overloaded`] immediately instead of piling up.
//!
//! A permit is released when the blocking work ends, not when the caller stops
//! waiting. A conversion that outlives its caller's timeout still counts
//! against the bound until it observes its [`CancelFlag`] at the next page.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::pipeline::CancelFlag;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

/// Limits how many conversions run at once.
pub struct ConversionPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_queued: usize,
    queue_timeout: Duration,
    waiting: AtomicUsize,
    gauges: Arc<Gauges>,
}

#[derive(Default)]
struct Gauges {
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// Held for the lifetime of one blocking conversion.
struct Slot {
    _permit: OwnedSemaphorePermit,
    gauges: Arc<Gauges>,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit, gauges: Arc<Gauges>) -> Self {
        let now = gauges.running.fetch_add(1, Ordering::SeqCst) + 1;
        gauges.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            _permit: permit,
            gauges,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauges.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Raises the flag when the caller stops waiting, whether by timeout or
/// because its future was dropped (client disconnect).
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Decrements the waiting count however the wait ends.
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConversionPool {
    pub fn new(max_concurrent: usize, max_queued: usize, queue_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queued,
            queue_timeout,
            waiting: AtomicUsize::new(0),
            gauges: Arc::new(Gauges::default()),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.max_concurrent, config.max_queued, config.queue_timeout)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Conversions currently executing.
    pub fn running(&self) -> usize {
        self.gauges.running.load(Ordering::SeqCst)
    }

    /// Highest value [`running`](Self::running) has reached.
    pub fn peak_running(&self) -> usize {
        self.gauges.peak.load(Ordering::SeqCst)
    }

    /// Requests currently waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Run `job` on the blocking pool once a slot is free.
    ///
    /// The caller waits at most `timeout` for the job itself; when that
    /// elapses the job's [`CancelFlag`] is raised and
    /// [`ServiceError::ConversionTimeout`] returned.
    pub async fn run<T, F>(&self, timeout: Duration, job: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelFlag) -> Result<T, ServiceError> + Send + 'static,
    {
        let slot = Slot::new(self.acquire().await?, Arc::clone(&self.gauges));

        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let _cancel_on_drop = CancelOnDrop(cancel);
        let handle = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            job(&job_cancel)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ServiceError::Internal(format!(
                "Conversion task panicked: {e}"
            ))),
            Err(_) => {
                warn!("Conversion exceeded {}s, cancelling", timeout.as_secs());
                Err(ServiceError::ConversionTimeout {
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, ServiceError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(closed()),
            Err(TryAcquireError::NoPermits) => {}
        }

        if self.waiting.fetch_add(1, Ordering::SeqCst) >= self.max_queued {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(self.overloaded(format!(
                "{} requests already waiting for a conversion slot",
                self.max_queued
            )));
        }
        let _waiting = Waiting(&self.waiting);
        debug!(waiting = self.waiting(), "Waiting for a conversion slot");

        match tokio::time::timeout(
            self.queue_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(closed()),
            Err(_) => Err(self.overloaded(format!(
                "no conversion slot freed within {}s",
                self.queue_timeout.as_secs()
            ))),
        }
    }

    fn overloaded(&self, detail: String) -> ServiceError {
        ServiceError::Overloaded {
            detail,
            retry_after_secs: self.queue_timeout.as_secs().max(1),
        }
    }
}

fn closed() -> ServiceError {
    ServiceError::Internal("conversion pool is shut down".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn runs_job_and_returns_value() {
        let pool = ConversionPool::new(2, 2, Duration::from_secs(1));
        let v = pool.run(Duration::from_secs(5), |_| Ok(41 + 1)).await.unwrap();
        assert_eq!(v, 42);
        assert_eq!(pool.running(), 0);
        assert_eq!(pool.peak_running(), 1);
    }

    #[tokio::test]
    async fn job_errors_pass_through() {
        let pool = ConversionPool::new(1, 0, Duration::from_secs(1));
        let err = pool
            .run(Duration::from_secs(5), |_| {
                Err::<(), _>(ServiceError::corrupt("bad xref"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::CorruptDocument { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_queue_is_overloaded() {
        let pool = Arc::new(ConversionPool::new(1, 0, Duration::from_secs(5)));
        let release = Arc::new(AtomicBool::new(false));

        let busy = {
            let pool = Arc::clone(&pool);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                pool.run(Duration::from_secs(10), move |_| {
                    while !release.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                })
                .await
            })
        };
        while pool.running() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = pool.run(Duration::from_secs(1), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Overloaded { .. }));
        assert!(err.is_retryable());

        release.store(true, Ordering::SeqCst);
        busy.await.unwrap().unwrap();
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_timeout_is_overloaded() {
        let pool = Arc::new(ConversionPool::new(1, 4, Duration::from_millis(50)));
        let release = Arc::new(AtomicBool::new(false));

        let busy = {
            let pool = Arc::clone(&pool);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                pool.run(Duration::from_secs(10), move |_| {
                    while !release.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                })
                .await
            })
        };
        while pool.running() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = pool.run(Duration::from_secs(1), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Overloaded { retry_after_secs: 1, .. }));

        release.store(true, Ordering::SeqCst);
        busy.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_raises_cancel_flag_and_keeps_slot() {
        let pool = ConversionPool::new(1, 1, Duration::from_secs(5));
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);

        let err = pool
            .run(Duration::from_millis(50), move |cancel| {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                seen.store(true, Ordering::SeqCst);
                Err::<(), _>(ServiceError::Cancelled)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConversionTimeout { .. }));

        // The slot is held until the blocking job notices the flag.
        while pool.running() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(observed.load(Ordering::SeqCst));
    }
}
