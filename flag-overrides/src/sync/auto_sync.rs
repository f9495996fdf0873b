use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use super::snapshot::{capture_snapshot, collect_overrides, snapshot_changed, Snapshot};
use super::{wait_for_flags, FlagSource, OverrideTransport, SyncError};
use crate::metrics_consts::{SYNC_FAILURES_COUNTER, SYNC_PUSHES_COUNTER};

pub type OnSynced = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// When false, `start` does not watch for changes. Manual syncs still work.
    pub enabled: bool,
    /// Quiet period after the last change before pushing.
    pub debounce: Duration,
    /// Upper bound on waiting for the source to load its flags.
    pub ready_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            enabled: true,
            debounce: Duration::from_millis(500),
            ready_timeout: Duration::from_millis(800),
        }
    }
}

/// Pushes the client's full flag state to the server, on demand or
/// automatically whenever the client's flags change.
pub struct OverrideSync<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    transport: Arc<T>,
    options: SyncOptions,
    on_synced: Option<OnSynced>,
}

impl<S, T> OverrideSync<S, T>
where
    S: FlagSource + Send + Sync + ?Sized + 'static,
    T: OverrideTransport + Send + Sync + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, transport: Arc<T>, options: SyncOptions) -> Self {
        OverrideSync {
            source,
            transport,
            options,
            on_synced: None,
        }
    }

    /// Called after every successful push or clear, e.g. to refresh the page.
    pub fn on_synced(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_synced = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn sync_now(&self) -> Result<(), SyncError> {
        self.push_all().await?;
        self.notify_synced();
        Ok(())
    }

    pub async fn clear_overrides(&self) -> Result<(), SyncError> {
        self.transport.clear().await.inspect_err(|e| {
            metrics::counter!(SYNC_FAILURES_COUNTER, "operation" => "clear").increment(1);
            tracing::warn!("failed to clear flag overrides: {}", e);
        })?;
        tracing::info!("cleared server flag overrides");
        self.notify_synced();
        Ok(())
    }

    /// Starts watching the source. Stopping or dropping the handle ends the
    /// watch and discards any pending push.
    pub fn start(self: &Arc<Self>) -> AutoSyncHandle {
        if !self.options.enabled {
            tracing::debug!("override auto-sync disabled");
            return AutoSyncHandle::idle();
        }

        // Subscribe before priming so changes made while we wait are not lost.
        let changes = self.source.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().watch(changes, shutdown_rx));

        AutoSyncHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    async fn push_all(&self) -> Result<(), SyncError> {
        wait_for_flags(&*self.source, self.options.ready_timeout).await;
        let bag = collect_overrides(&*self.source);

        self.transport
            .push(&bag)
            .await
            .inspect_err(|e| {
                metrics::counter!(SYNC_FAILURES_COUNTER, "operation" => "push").increment(1);
                tracing::warn!("failed to sync flag overrides: {}", e);
            })?;

        metrics::counter!(SYNC_PUSHES_COUNTER).increment(1);
        tracing::debug!(flags = bag.flags.len(), "synced flag overrides");
        Ok(())
    }

    fn notify_synced(&self) {
        if let Some(callback) = &self.on_synced {
            callback();
        }
    }

    async fn prime(&self) -> Snapshot {
        wait_for_flags(&*self.source, self.options.ready_timeout).await;
        capture_snapshot(&*self.source)
    }

    async fn watch(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<()>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut baseline = tokio::select! {
            _ = &mut shutdown => return,
            baseline = self.prime() => baseline,
        };
        tracing::debug!(flags = baseline.len(), "override auto-sync primed");

        let mut pending: Option<(Pin<Box<Sleep>>, Snapshot)> = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!("override auto-sync stopped");
                    return;
                }
                received = changes.recv() => {
                    match received {
                        Ok(()) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "missed flag change notifications");
                        }
                        Err(RecvError::Closed) => {
                            tracing::debug!("flag source closed, ending override auto-sync");
                            return;
                        }
                    }

                    let next = capture_snapshot(&*self.source);
                    if snapshot_changed(&baseline, &next) {
                        pending = Some((Box::pin(tokio::time::sleep(self.options.debounce)), next));
                    }
                }
                _ = debounce_elapsed(&mut pending) => {
                    let Some((_, next)) = pending.take() else {
                        continue;
                    };
                    // Failures are already logged; keep the old baseline so the
                    // next change retries.
                    if self.push_all().await.is_ok() {
                        baseline = next;
                        self.notify_synced();
                    }
                }
            }
        }
    }
}

async fn debounce_elapsed(pending: &mut Option<(Pin<Box<Sleep>>, Snapshot)>) {
    match pending {
        Some((sleep, _)) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Owns a running auto-sync. Dropping it stops the watch.
#[derive(Debug)]
pub struct AutoSyncHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AutoSyncHandle {
    fn idle() -> Self {
        AutoSyncHandle {
            shutdown: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the watch and waits for it to exit. A push already in flight
    /// runs to completion first.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("override auto-sync task failed: {}", e);
            }
        }
    }
}
