//! Bounded background worker pool
//!
//! Fire-and-forget jobs (the post-query cold restart) run here. A job's
//! result goes to the log only; nothing flows back to whoever submitted it.
//! When the queue is full new jobs are dropped with a warning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::shutdown::ShutdownSignal;
use crate::config::BackgroundConfig;
use crate::error::Result;

type Job = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct Task {
    label: &'static str,
    job: Job,
}

/// Fixed-size pool draining a bounded job queue
pub struct BackgroundPool {
    sender: mpsc::Sender<Task>,
    shutdown: ShutdownSignal,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl BackgroundPool {
    /// Spawn the workers on the current tokio runtime
    pub fn start(config: &BackgroundConfig, shutdown: ShutdownSignal) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|id| tokio::spawn(worker_loop(id, receiver.clone(), shutdown.clone())))
            .collect();

        Self {
            sender,
            shutdown,
            workers: SyncMutex::new(workers),
        }
    }

    /// Queue a job; returns false if it was dropped
    pub fn submit<F>(&self, label: &'static str, job: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.shutdown.is_triggered() {
            warn!("Background pool shutting down, dropping {}", label);
            return false;
        }
        match self.sender.try_send(Task {
            label,
            job: Box::pin(job),
        }) {
            Ok(()) => {
                debug!("Queued background job {}", label);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Background queue full, dropping {}", label);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Background pool stopped, dropping {}", label);
                false
            }
        }
    }

    /// Stop taking jobs and wait for the workers to exit
    ///
    /// A job already running is allowed to finish; queued jobs are dropped.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Task>>>, shutdown: ShutdownSignal) {
    let mut stop = shutdown.subscribe();
    loop {
        if shutdown.is_triggered() {
            break;
        }
        let task = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = stop.recv() => None,
                task = receiver.recv() => task,
            }
        };
        let Some(Task { label, job }) = task else {
            break;
        };

        // A panicking job must not take the worker down with it
        match tokio::spawn(job).await {
            Ok(Ok(())) => info!("Background job {} finished", label),
            Ok(Err(e)) => warn!("Background job {} failed: {}", label, e),
            Err(e) => warn!("Background job {} aborted: {}", label, e),
        }
    }
    debug!("Background worker {} exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PqdagError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_and_failures_stay_local() {
        let pool = BackgroundPool::start(&BackgroundConfig::default(), ShutdownSignal::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        assert!(pool.submit("failing", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PqdagError::Internal {
                message: "boom".into(),
            })
        }));
        let counter = ran.clone();
        assert!(pool.submit("ok", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..100 {
            if ran.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_jobs() {
        let config = BackgroundConfig {
            workers: 1,
            queue_capacity: 1,
        };
        let pool = BackgroundPool::start(&config, ShutdownSignal::new());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        // Occupies the only worker until released
        assert!(pool.submit("blocker", async move {
            let _ = gate.await;
            Ok(())
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.submit("queued", async { Ok(()) }));
        assert!(!pool.submit("dropped", async { Ok(()) }));

        let _ = release.send(());
        pool.shutdown().await;
    }
}
