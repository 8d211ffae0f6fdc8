use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::KnowledgeItem;
use crate::services::embedding_store::EmbeddingStore;
use crate::services::provider::EmbeddingProvider;

/// Summary of one precompute run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputeReport {
    pub generation: u64,
    pub embedded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Control side of a running precompute worker.
///
/// Dropping the handle does not stop the worker.
pub struct PrecomputeHandle {
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<Option<PrecomputeReport>>,
}

impl PrecomputeHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.done_rx.borrow().is_some()
    }

    /// Wait until the worker stops. `None` if it died without reporting.
    pub async fn wait(&self) -> Option<PrecomputeReport> {
        let mut rx = self.done_rx.clone();
        let report = rx.wait_for(Option::is_some).await.ok()?;
        report.clone()
    }
}

/// Resolves once cancellation is requested; never resolves if the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Background worker that fills the [`EmbeddingStore`] one item at a time,
/// pausing between calls to spare the embedding backend.
pub struct PrecomputeWorker {
    items: Arc<Vec<KnowledgeItem>>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<EmbeddingStore>,
    generation: u64,
    delay: Duration,
}

impl PrecomputeWorker {
    pub fn spawn(
        items: Arc<Vec<KnowledgeItem>>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<EmbeddingStore>,
        generation: u64,
        delay: Duration,
    ) -> PrecomputeHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        let worker = Self {
            items,
            embedder,
            store,
            generation,
            delay,
        };

        tokio::spawn(async move {
            let report = worker.run(cancel_rx).await;
            let _ = done_tx.send(Some(report));
        });

        PrecomputeHandle { cancel_tx, done_rx }
    }

    async fn run(self, mut cancel_rx: watch::Receiver<bool>) -> PrecomputeReport {
        let start = Instant::now();
        let total = self.items.len();
        let mut report = PrecomputeReport {
            generation: self.generation,
            embedded: 0,
            failed: 0,
            cancelled: false,
        };

        info!(
            "Precomputing embeddings for {} knowledge items (generation {})",
            total, self.generation
        );

        for (idx, item) in self.items.iter().enumerate() {
            if *cancel_rx.borrow() {
                report.cancelled = true;
                break;
            }

            let text = item.embedding_text();
            let result = tokio::select! {
                r = self.embedder.embed(&text) => Some(r),
                _ = cancelled(&mut cancel_rx) => None,
            };

            match result {
                None => {
                    report.cancelled = true;
                    break;
                }
                Some(Ok(vector)) => {
                    if !self.store.insert(self.generation, item.id.clone(), vector) {
                        debug!("Generation {} superseded, stopping", self.generation);
                        report.cancelled = true;
                        break;
                    }
                    report.embedded += 1;
                }
                Some(Err(e)) => {
                    warn!("Failed to embed knowledge item {}: {}", item.id, e);
                    report.failed += 1;
                }
            }

            if idx + 1 < total && !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancelled(&mut cancel_rx) => {
                        report.cancelled = true;
                        break;
                    }
                }
            }
        }

        if report.cancelled {
            info!(
                "Embedding precompute cancelled after {} items (generation {})",
                report.embedded, self.generation
            );
        } else {
            info!(
                "Embedding precompute finished: {} cached, {} failed in {:?}",
                report.embedded,
                report.failed,
                start.elapsed()
            );
        }

        report
    }
}
