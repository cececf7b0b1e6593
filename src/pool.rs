//! The worker pool: a fixed set of workers, each owning its own browser,
//! draining one shared queue of conversion items.
//!
//! Workers pull from a bounded MPMC channel until it is closed and
//! drained. Every dequeued item reaches exactly one terminal state;
//! results go out in completion order. A pool-wide cancellation flag turns
//! queued items into `Cancelled` and aborts the conversion in flight,
//! after which the worker drops its backend (the next item gets a fresh
//! browser). Session-fatal errors likewise make the worker rebuild instead
//! of poisoning the next item.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::convert::{ConversionItem, ConversionStatus};
use crate::error::{CdpError, Result};

/// One worker's conversion engine. The real implementation owns a browser
/// process and its devtools sessions for the worker's lifetime.
pub trait WorkerBackend: Send + 'static {
    fn convert(
        &mut self,
        item: &ConversionItem,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Graceful teardown once the worker has drained the queue. The
    /// default just drops the backend.
    fn shutdown(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async {}
    }
}

/// Builds a [`WorkerBackend`] per worker, and again after one is torn down
/// by a session-fatal error.
pub trait BackendFactory: Send + Sync + 'static {
    type Backend: WorkerBackend;

    fn create(
        &self,
        worker_id: usize,
    ) -> impl Future<Output = Result<Self::Backend>> + Send;
}

/// Default bound on the item queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub struct WorkerPool {
    queue: async_channel::Sender<ConversionItem>,
    results: mpsc::UnboundedReceiver<ConversionItem>,
    cancel: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers over `factory`.
    pub fn start<F: BackendFactory>(factory: F, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (queue_tx, queue_rx) = async_channel::bounded(DEFAULT_QUEUE_CAPACITY);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let factory = Arc::new(factory);

        let workers = (0..concurrency)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&factory),
                    queue_rx.clone(),
                    results_tx.clone(),
                    cancel_rx.clone(),
                ))
            })
            .collect();

        Self {
            queue: queue_tx,
            results: results_rx,
            cancel: cancel_tx,
            workers,
        }
    }

    /// Enqueue an item. Fails once the pool is closed.
    pub async fn submit(&self, item: ConversionItem) -> Result<()> {
        self.queue
            .send(item)
            .await
            .map_err(|_| CdpError::Cancelled)
    }

    /// Flag cancellation: queued items drain as `Cancelled`, in-flight
    /// conversions are aborted.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Close the queue, wait for the workers to drain it, and return every
    /// item in completion order.
    pub async fn join(mut self) -> Vec<ConversionItem> {
        self.queue.close();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "pool worker panicked");
            }
        }
        let mut items = Vec::new();
        while let Ok(item) = self.results.try_recv() {
            items.push(item);
        }
        items
    }
}

async fn worker_loop<F: BackendFactory>(
    worker_id: usize,
    factory: Arc<F>,
    queue: async_channel::Receiver<ConversionItem>,
    results: mpsc::UnboundedSender<ConversionItem>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut backend: Option<F::Backend> = None;

    while let Ok(mut item) = queue.recv().await {
        if *cancel.borrow() {
            item.status = ConversionStatus::Cancelled;
            let _ = results.send(item);
            continue;
        }

        if backend.is_none() {
            match factory.create(worker_id).await {
                Ok(built) => backend = Some(built),
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "worker could not build its browser");
                    item.status = ConversionStatus::Failed(e.to_string());
                    let _ = results.send(item);
                    continue;
                }
            }
        }
        let outcome = match backend.as_mut() {
            Some(active) => tokio::select! {
                result = active.convert(&item) => result,
                _ = cancel.changed() => Err(CdpError::Cancelled),
            },
            // Just populated above.
            None => continue,
        };

        match outcome {
            Ok(()) => {
                item.status = ConversionStatus::Success;
            }
            Err(CdpError::Cancelled) => {
                item.status = ConversionStatus::Cancelled;
                // The aborted conversion leaves the browser in an unknown
                // state; drop it and rebuild for whatever comes next.
                backend = None;
            }
            Err(e) => {
                tracing::warn!(
                    worker_id,
                    input = %item.input.url(),
                    error = %e,
                    "conversion failed"
                );
                if e.is_session_fatal() {
                    backend = None;
                }
                item.status = ConversionStatus::Failed(e.to_string());
            }
        }
        let _ = results.send(item);
    }

    if let Some(active) = backend.take() {
        active.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConvertInput;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockBackend {
        worker_id: usize,
        converted: Arc<AtomicUsize>,
        delay: Duration,
        fail_marker: Option<&'static str>,
    }

    impl WorkerBackend for MockBackend {
        async fn convert(&mut self, item: &ConversionItem) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.converted.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_marker {
                if item.output.to_string_lossy().contains(marker) {
                    return Err(CdpError::Navigation(format!(
                        "worker {} refused {marker}",
                        self.worker_id
                    )));
                }
            }
            Ok(())
        }
    }

    struct MockFactory {
        converted: Arc<AtomicUsize>,
        created: Arc<AtomicUsize>,
        delay: Duration,
        fail_marker: Option<&'static str>,
    }

    impl BackendFactory for MockFactory {
        type Backend = MockBackend;

        async fn create(&self, worker_id: usize) -> Result<MockBackend> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(MockBackend {
                worker_id,
                converted: Arc::clone(&self.converted),
                delay: self.delay,
                fail_marker: self.fail_marker,
            })
        }
    }

    fn items(n: usize) -> Vec<ConversionItem> {
        (0..n)
            .map(|i| {
                ConversionItem::new(
                    ConvertInput::parse(&format!("http://example.test/{i}.html")).unwrap(),
                    format!("out-{i}.pdf"),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn every_item_reaches_exactly_one_terminal_state() {
        let converted = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::start(
            MockFactory {
                converted: Arc::clone(&converted),
                created: Arc::clone(&created),
                delay: Duration::from_millis(2),
                fail_marker: None,
            },
            4,
        );

        for item in items(40) {
            pool.submit(item).await.unwrap();
        }
        let results = pool.join().await;

        assert_eq!(results.len(), 40);
        assert!(results.iter().all(|i| i.is_terminal()));
        assert!(results
            .iter()
            .all(|i| i.status == ConversionStatus::Success));
        // Union of results equals the input multiset.
        let outputs: HashSet<_> = results
            .iter()
            .map(|i| i.output.to_string_lossy().into_owned())
            .collect();
        assert_eq!(outputs.len(), 40);
        assert_eq!(converted.load(Ordering::SeqCst), 40);
        // Browsers are reused across items, one per worker.
        assert_eq!(created.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn per_item_failures_do_not_stop_the_worker() {
        let pool = WorkerPool::start(
            MockFactory {
                converted: Arc::new(AtomicUsize::new(0)),
                created: Arc::new(AtomicUsize::new(0)),
                delay: Duration::from_millis(1),
                fail_marker: Some("out-3"),
            },
            2,
        );
        for item in items(8) {
            pool.submit(item).await.unwrap();
        }
        let results = pool.join().await;

        assert_eq!(results.len(), 8);
        let failed: Vec<_> = results
            .iter()
            .filter(|i| matches!(i.status, ConversionStatus::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].output.to_string_lossy().contains("out-3"));
        assert_eq!(
            results
                .iter()
                .filter(|i| i.status == ConversionStatus::Success)
                .count(),
            7
        );
    }

    #[tokio::test]
    async fn cancellation_drains_the_queue_as_cancelled() {
        let pool = WorkerPool::start(
            MockFactory {
                converted: Arc::new(AtomicUsize::new(0)),
                created: Arc::new(AtomicUsize::new(0)),
                delay: Duration::from_millis(100),
                fail_marker: None,
            },
            2,
        );
        for item in items(20) {
            pool.submit(item).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        pool.cancel();
        let results = pool.join().await;

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|i| i.is_terminal()));
        let cancelled = results
            .iter()
            .filter(|i| i.status == ConversionStatus::Cancelled)
            .count();
        let succeeded = results
            .iter()
            .filter(|i| i.status == ConversionStatus::Success)
            .count();
        assert!(cancelled > 0, "some items must have been cancelled");
        assert!(succeeded > 0, "the head of the queue completed first");
        assert_eq!(cancelled + succeeded, 20);
    }
}
