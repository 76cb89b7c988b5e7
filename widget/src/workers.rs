//! Background workers and the periodic scans feeding them.
//!
//! Each queue is bounded. Scans never wait on a full queue: whatever does
//! not fit is dropped and picked up again by a later scan.

use crate::metrics_defs::QUEUE_DROPPED;
use crate::models::{ProjectStatus, cutoff};
use crate::service::Core;
use chrono::Utc;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;

// Statuses a periodic project scan requeues once stale.
const RESYNC_STATUSES: &[ProjectStatus] = &[ProjectStatus::Ok, ProjectStatus::Forbidden];

/// Senders of the three work queues.
pub(crate) struct Queues {
    pub resolve: mpsc::Sender<String>,
    pub sync: mpsc::Sender<u64>,
    pub authors: mpsc::Sender<u64>,
}

pub(crate) struct Receivers {
    pub resolve: mpsc::Receiver<String>,
    pub sync: mpsc::Receiver<u64>,
    pub authors: mpsc::Receiver<u64>,
}

pub(crate) fn queues(resolve: usize, sync: usize, authors: usize) -> (Queues, Receivers) {
    let (resolve_tx, resolve_rx) = mpsc::channel(resolve);
    let (sync_tx, sync_rx) = mpsc::channel(sync);
    let (authors_tx, authors_rx) = mpsc::channel(authors);
    (
        Queues {
            resolve: resolve_tx,
            sync: sync_tx,
            authors: authors_tx,
        },
        Receivers {
            resolve: resolve_rx,
            sync: sync_rx,
            authors: authors_rx,
        },
    )
}

/// Offers every item without waiting. Returns how many were accepted.
pub(crate) fn enqueue_batch<T>(
    tx: &mpsc::Sender<T>,
    queue: &'static str,
    items: impl IntoIterator<Item = T>,
) -> usize {
    let mut accepted = 0;
    let mut items = items.into_iter();
    while let Some(item) = items.next() {
        match tx.try_send(item) {
            Ok(()) => accepted += 1,
            Err(TrySendError::Full(_)) => {
                let dropped = 1 + items.by_ref().count();
                counter!(QUEUE_DROPPED, "queue" => queue).increment(dropped as u64);
                tracing::warn!(queue, dropped, "queue full, deferring to next scan");
                break;
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(queue, "queue closed");
                break;
            }
        }
    }
    accepted
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Processes queued paths one at a time and hands each outcome to the
/// callers waiting on that path.
pub(crate) async fn resolve_worker(core: Arc<Core>, mut rx: mpsc::Receiver<String>) {
    while let Some(path) = rx.recv().await {
        let resolution = core.resolver.process(&path).await;
        core.resolutions.complete(&path, resolution);
    }
}

/// One of several workers sharing the sync queue.
pub(crate) async fn sync_worker(core: Arc<Core>, rx: Arc<Mutex<mpsc::Receiver<u64>>>) {
    loop {
        let Some(external_id) = rx.lock().await.recv().await else {
            break;
        };

        match core.needs_sync(external_id).await {
            Ok(true) => {
                // Failures are logged by the syncer and retried on a later scan.
                let _ = core.syncer.sync(external_id).await;
            }
            Ok(false) => tracing::debug!(external_id, "already fresh, skipping"),
            Err(err) => tracing::error!(external_id, error = %err, "failed to load project"),
        }
    }
}

pub(crate) async fn author_worker(core: Arc<Core>, mut rx: mpsc::Receiver<u64>) {
    while let Some(member_id) = rx.recv().await {
        if let Err(err) = core.authors.resync(member_id).await {
            tracing::warn!(member_id, error = %err, "author resync failed");
        }
    }
}

pub(crate) async fn scan_projects(core: Arc<Core>) {
    let config = &core.config.sync;
    let window = Duration::from_secs(config.staleness_secs);
    let mut ticker = interval(Duration::from_secs(config.scan_interval_secs));

    loop {
        ticker.tick().await;
        let older_than = cutoff(window, Utc::now());
        let stale = match core
            .store
            .stale_projects(RESYNC_STATUSES, older_than, config.batch_size)
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                tracing::error!(error = %err, "failed to scan for stale projects");
                continue;
            }
        };

        let ids = stale.into_iter().filter_map(|p| p.external_id);
        let queued = enqueue_batch(&core.queues.sync, "sync", ids);
        if queued > 0 {
            tracing::info!(queued, "requeued stale projects");
        }
    }
}

pub(crate) async fn scan_authors(core: Arc<Core>) {
    let config = &core.config.authors;
    let window = Duration::from_secs(config.staleness_secs);
    let mut ticker = interval(Duration::from_secs(config.scan_interval_secs));

    loop {
        ticker.tick().await;
        let older_than = cutoff(window, Utc::now());
        let stale = match core.store.stale_authors(older_than, config.batch_size).await {
            Ok(stale) => stale,
            Err(err) => {
                tracing::error!(error = %err, "failed to scan for stale authors");
                continue;
            }
        };

        let ids = stale.into_iter().map(|a| a.member_id);
        let queued = enqueue_batch(&core.queues.authors, "authors", ids);
        if queued > 0 {
            tracing::info!(queued, "requeued stale authors");
        }
    }
}

/// Reloads games and categories, starting immediately.
pub(crate) async fn refresh_reference(core: Arc<Core>) {
    let period = Duration::from_secs(core.config.reference.refresh_interval_secs);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        if let Err(err) = core.reference.refresh().await {
            tracing::warn!(error = %err, "reference refresh failed, keeping previous data");
        }
    }
}

pub(crate) async fn sweep_cache(core: Arc<Core>) {
    let mut ticker = interval(Duration::from_secs(core.config.cache.sweep_interval_secs));
    loop {
        ticker.tick().await;
        core.cache.sweep();
    }
}
