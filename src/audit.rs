//! Background audit logging.
//!
//! Handlers enqueue entries without waiting; a small pool of workers persists
//! them through an [`AuditSink`]. The pool is supervised: a worker that panics
//! is replaced. On shutdown the workers drain whatever is still queued, then
//! exit.
//!
//! ```ignore
//! let audit = AuditLogger::spawn(sink, 1024, 2);
//! audit.log(entry);
//! // ...
//! audit.shutdown().await;
//! ```

use crate::models::AuditEntry;
use crate::store::AuditSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// Counters for the audit pool.
#[derive(Debug, Default)]
pub struct AuditStats {
    /// Entries accepted onto the queue.
    pub enqueued: AtomicU64,
    /// Entries persisted by the sink.
    pub written: AtomicU64,
    /// Entries the sink rejected.
    pub failed: AtomicU64,
    /// Entries refused because the queue was full or closed.
    pub dropped: AtomicU64,
    /// Workers replaced after a panic.
    pub restarts: AtomicU64,
}

impl AuditStats {
    pub fn snapshot(&self) -> AuditStatsSnapshot {
        AuditStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditStatsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
    pub restarts: u64,
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<AuditEntry>>>;

/// Handle to the audit pool. Cheap to clone.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEntry>,
    stats: Arc<AuditStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AuditLogger {
    /// Starts `workers` workers draining a queue of `capacity` entries.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(AuditStats::default());

        let supervisor = tokio::spawn(supervise(
            Arc::new(Mutex::new(rx)),
            sink,
            Arc::clone(&stats),
            shutdown_rx,
            workers.max(1),
        ));

        tracing::info!(capacity, workers, "Audit pool started");

        Self {
            tx,
            stats,
            shutdown_tx: Arc::new(shutdown_tx),
            supervisor: Arc::new(Mutex::new(Some(supervisor))),
        }
    }

    /// Enqueues an entry without waiting. A full queue, or one closed by
    /// shutdown, drops the entry.
    pub fn log(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    action = %entry.action,
                    company_id = entry.company_id,
                    "Audit queue full, entry dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(action = %entry.action, "Audit pool shut down, entry dropped");
            }
        }
    }

    pub fn stats(&self) -> AuditStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops accepting entries, waits for the workers to drain the queue.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Audit supervisor failed: {}", e);
            }
            let snapshot = self.stats();
            tracing::info!(
                enqueued = snapshot.enqueued,
                written = snapshot.written,
                failed = snapshot.failed,
                dropped = snapshot.dropped,
                restarts = snapshot.restarts,
                "Audit pool stopped"
            );
        }
    }
}

async fn supervise(
    queue: SharedQueue,
    sink: Arc<dyn AuditSink>,
    stats: Arc<AuditStats>,
    shutdown_rx: watch::Receiver<bool>,
    workers: usize,
) {
    let mut pool = JoinSet::new();
    let spawn_worker = |pool: &mut JoinSet<()>, id: usize| {
        pool.spawn(run_worker(
            id,
            Arc::clone(&queue),
            Arc::clone(&sink),
            Arc::clone(&stats),
            shutdown_rx.clone(),
        ));
    };

    for id in 0..workers {
        spawn_worker(&mut pool, id);
    }

    let mut next_id = workers;
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                stats.restarts.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Audit worker panicked, restarting as worker {}", next_id);
                // A replacement drains the queue and exits on its own once
                // shutdown has been signalled.
                spawn_worker(&mut pool, next_id);
                next_id += 1;
            }
            Err(e) => tracing::warn!("Audit worker cancelled: {}", e),
        }
    }
}

async fn run_worker(
    id: usize,
    queue: SharedQueue,
    sink: Arc<dyn AuditSink>,
    stats: Arc<AuditStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("Audit worker {} started", id);

    loop {
        let next = {
            let mut rx = queue.lock().await;
            if *shutdown_rx.borrow() {
                // Closing first means nothing can be enqueued once the drain
                // below comes up empty.
                rx.close();
                rx.recv().await
            } else {
                tokio::select! {
                    entry = rx.recv() => entry,
                    _ = shutdown_rx.changed() => {
                        rx.close();
                        rx.recv().await
                    }
                }
            }
        };

        let Some(entry) = next else {
            // Closed and drained, or every sender is gone.
            break;
        };

        match sink.record(&entry).await {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %entry.action,
                    company_id = entry.company_id,
                    "Failed to write audit entry: {}",
                    e
                );
            }
        }
    }

    tracing::debug!("Audit worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::memory_store::MemoryStorage;
    use crate::models::AuditLogRecord;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    fn entry(company_id: i64, action: &str) -> AuditEntry {
        AuditEntry {
            company_id,
            hr_user_id: 7,
            action: action.to_string(),
            target_type: "candidate".to_string(),
            target_id: "alice".to_string(),
            meta: serde_json::json!({}),
        }
    }

    /// Panics on `boom`, fails on `fail`, otherwise writes through.
    struct FlakySink {
        inner: MemoryStorage,
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn record(&self, entry: &AuditEntry) -> Result<(), AppError> {
            match entry.action.as_str() {
                "boom" => panic!("sink exploded"),
                "fail" => Err(AppError::InternalError("insert failed".into())),
                _ => self.inner.record(entry).await,
            }
        }

        async fn list(&self, company_id: i64, limit: i64, offset: i64) -> Result<Vec<AuditLogRecord>, AppError> {
            self.inner.list(company_id, limit, offset).await
        }
    }

    /// Blocks every write until a permit is released.
    struct GatedSink {
        gate: Arc<Semaphore>,
        inner: MemoryStorage,
    }

    #[async_trait]
    impl AuditSink for GatedSink {
        async fn record(&self, entry: &AuditEntry) -> Result<(), AppError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            permit.forget();
            self.inner.record(entry).await
        }

        async fn list(&self, company_id: i64, limit: i64, offset: i64) -> Result<Vec<AuditLogRecord>, AppError> {
            self.inner.list(company_id, limit, offset).await
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = MemoryStorage::new();
        let audit = AuditLogger::spawn(Arc::new(store.clone()), 128, 3);

        for _ in 0..50 {
            audit.log(entry(1, "candidate.view"));
        }
        audit.shutdown().await;

        let stats = audit.stats();
        assert_eq!(stats.enqueued, 50);
        assert_eq!(stats.written, 50);
        assert_eq!(store.audit_entries(1).len(), 50);
    }

    #[tokio::test]
    async fn test_full_queue_drops_entries() {
        let gate = Arc::new(Semaphore::new(0));
        let store = MemoryStorage::new();
        let sink = GatedSink {
            gate: Arc::clone(&gate),
            inner: store.clone(),
        };
        let audit = AuditLogger::spawn(Arc::new(sink), 2, 1);

        for _ in 0..10 {
            audit.log(entry(1, "candidate.list"));
        }

        let before = audit.stats();
        assert_eq!(before.enqueued + before.dropped, 10);
        assert!(before.dropped >= 7, "dropped {}", before.dropped);

        gate.add_permits(10);
        audit.shutdown().await;

        let after = audit.stats();
        assert_eq!(after.written, after.enqueued);
        assert_eq!(store.audit_entries(1).len() as u64, after.enqueued);
    }

    #[tokio::test]
    async fn test_panicked_worker_is_replaced() {
        let store = MemoryStorage::new();
        let audit = AuditLogger::spawn(Arc::new(FlakySink { inner: store.clone() }), 16, 1);

        audit.log(entry(1, "boom"));
        audit.log(entry(1, "fail"));
        audit.log(entry(1, "candidate.unlock"));
        audit.shutdown().await;

        let stats = audit.stats();
        assert_eq!(stats.restarts, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(store.audit_entries(1)[0].action, "candidate.unlock");
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_dropped() {
        let audit = AuditLogger::spawn(Arc::new(MemoryStorage::new()), 4, 1);
        audit.shutdown().await;
        audit.shutdown().await;

        audit.log(entry(1, "candidate.view"));
        assert_eq!(audit.stats().dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_logging_during_shutdown_loses_nothing() {
        const TOTAL: u64 = 2_000;
        let store = MemoryStorage::new();
        let audit = AuditLogger::spawn(Arc::new(store.clone()), 4_096, 2);

        let producer = {
            let audit = audit.clone();
            tokio::spawn(async move {
                for i in 0..TOTAL {
                    audit.log(entry(1, "candidate.list"));
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        tokio::task::yield_now().await;
        audit.shutdown().await;
        producer.await.unwrap();

        // Every accepted entry was persisted; everything else was counted.
        let stats = audit.stats();
        assert_eq!(stats.enqueued + stats.dropped, TOTAL);
        assert_eq!(stats.written, stats.enqueued);
        assert_eq!(store.audit_entries(1).len() as u64, stats.enqueued);
    }
}
