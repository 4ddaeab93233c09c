//! Controller loop: turns store changes into reconcile runs.
//!
//! Keys come from an initial listing, from the store's change stream and,
//! if configured, from a periodic resync. Workers pull keys from the
//! [`WorkQueue`], run the [`Reconciler`], and requeue failures with backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::store::ResourceWatch;
use crate::types::ReconcileOutcome;

/// Drives a [`Reconciler`] from a [`ResourceWatch`].
pub struct Controller {
    reconciler: Arc<Reconciler>,
    source: Arc<dyn ResourceWatch>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(
        reconciler: Arc<Reconciler>,
        source: Arc<dyn ResourceWatch>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reconciler,
            source,
            config,
        })
    }

    /// Spawn the feeders and workers. Must be called inside a tokio runtime.
    pub fn start(self) -> ControllerHandle {
        let queue = Arc::new(WorkQueue::new(
            self.config.backoff_base,
            self.config.backoff_max,
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        // Subscribe before listing so no change falls between the two.
        let changes = self.source.watch();
        let mut tasks = vec![tokio::spawn(feed_changes(
            Arc::clone(&self.source),
            changes,
            Arc::clone(&queue),
            stop_rx.clone(),
        ))];

        if let Some(interval) = self.config.resync_interval {
            tasks.push(tokio::spawn(resync(
                Arc::clone(&self.source),
                Arc::clone(&queue),
                interval,
                stop_rx,
            )));
        }

        tasks.extend((0..self.config.workers).map(|worker| {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&self.reconciler),
                Arc::clone(&queue),
            ))
        }));

        info!(
            workers = self.config.workers,
            resync = ?self.config.resync_interval,
            "Controller started"
        );

        ControllerHandle {
            queue,
            stop: stop_tx,
            tasks,
        }
    }
}

/// Handle to a running controller.
pub struct ControllerHandle {
    queue: Arc<WorkQueue>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// The queue feeding the workers, e.g. to enqueue a key by hand.
    pub const fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Stop feeding keys, let in-flight runs finish, and wait for all tasks.
    pub async fn shutdown(self) {
        info!("Controller shutting down");
        let _ = self.stop.send(true);
        self.queue.shutdown().await;

        for joined in join_all(self.tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "Controller task ended abnormally");
            }
        }
        info!("Controller stopped");
    }
}

async fn enqueue_all(source: &dyn ResourceWatch, queue: &WorkQueue) {
    match source.keys().await {
        Ok(keys) => {
            debug!(count = keys.len(), "Enqueueing all records");
            for key in keys {
                queue.add(key).await;
            }
        }
        Err(e) => warn!(error = %e, "Failed to list records"),
    }
}

async fn feed_changes(
    source: Arc<dyn ResourceWatch>,
    mut changes: broadcast::Receiver<tmplsync_core::ObjectKey>,
    queue: Arc<WorkQueue>,
    mut stop: watch::Receiver<bool>,
) {
    enqueue_all(source.as_ref(), &queue).await;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            received = changes.recv() => match received {
                Ok(key) => queue.add(key).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Change stream lagged, relisting");
                    enqueue_all(source.as_ref(), &queue).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Change stream closed");
                    break;
                }
            },
        }
    }
}

async fn resync(
    source: Arc<dyn ResourceWatch>,
    queue: Arc<WorkQueue>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires at once and the initial listing already covers it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => enqueue_all(source.as_ref(), &queue).await,
        }
    }
}

async fn run_worker(worker: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>) {
    debug!(worker, "Worker started");

    while let Some(key) = queue.get().await {
        let outcome = reconciler.reconcile(&key).await;
        trace!(worker, template = %key, outcome = outcome.label(), "Reconcile finished");

        match outcome {
            ReconcileOutcome::Converged | ReconcileOutcome::NotFound => queue.forget(&key).await,
            ReconcileOutcome::Requeue(error) => {
                let delay = queue.add_rate_limited(key.clone()).await;
                debug!(
                    worker,
                    template = %key,
                    phase = ?error.phase(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Requeued after error"
                );
            }
        }
        queue.done(&key).await;
    }

    debug!(worker, "Worker stopped");
}
