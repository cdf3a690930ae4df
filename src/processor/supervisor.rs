//! Worker tasks that drain the ingestion queue into the stream processor

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::infrastructure::log_messages;
use crate::ingestion::IngestionQueue;
use crate::processor::pipeline::StreamProcessor;
use crate::processor::ProcessorConfig;

/// Runs `workers` tasks, each pulling batches of up to `batch_size` events
///
/// On stop, workers finish their in-flight batch and keep draining the queue
/// until it is empty or the shutdown deadline passes. Tasks still running at
/// the deadline are aborted.
pub struct ProcessorSupervisor {
    processor: Arc<StreamProcessor>,
    queue: Arc<IngestionQueue>,
    workers: usize,
    batch_size: usize,
    batch_wait: Duration,
    shutdown_timeout: Duration,
    /// `Some(deadline)` once shutdown has been requested
    shutdown: watch::Sender<Option<Instant>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessorSupervisor {
    pub fn new(
        processor: Arc<StreamProcessor>,
        queue: Arc<IngestionQueue>,
        config: &ProcessorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            processor,
            queue,
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            batch_wait: config.batch_wait,
            shutdown_timeout: config.shutdown_timeout,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn processor(&self) -> &Arc<StreamProcessor> {
        &self.processor
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Spawn the worker tasks; calling `start` twice is a no-op
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        self.shutdown.send_replace(None);

        for worker in 0..self.workers {
            let worker_loop = WorkerLoop {
                worker,
                processor: self.processor.clone(),
                queue: self.queue.clone(),
                batch_size: self.batch_size,
                batch_wait: self.batch_wait,
                shutdown: self.shutdown.subscribe(),
            };
            handles.push(tokio::spawn(worker_loop.run()));
        }
        info!(workers = self.workers, "Processor supervisor started");
    }

    /// Request shutdown and wait for the workers to drain the queue
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.shutdown_timeout;
        info!(
            remaining = self.queue.len(),
            "Stopping processor supervisor"
        );
        self.shutdown.send_replace(Some(deadline));

        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("{}", log_messages::processor::WORKER_ABORTED);
                handle.abort();
            }
        }

        let abandoned = self.queue.len();
        if abandoned > 0 {
            warn!(abandoned, "{}", log_messages::processor::QUEUE_NOT_DRAINED);
        }
    }
}

impl std::fmt::Debug for ProcessorSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorSupervisor")
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

struct WorkerLoop {
    worker: usize,
    processor: Arc<StreamProcessor>,
    queue: Arc<IngestionQueue>,
    batch_size: usize,
    batch_wait: Duration,
    shutdown: watch::Receiver<Option<Instant>>,
}

impl WorkerLoop {
    async fn run(self) {
        info!(worker = self.worker, "{}", log_messages::processor::WORKER_STARTED);

        // dequeue_batch is bounded by batch_wait, so the flag is seen promptly
        while self.shutdown.borrow().is_none() {
            let batch = self.queue.dequeue_batch(self.batch_size, self.batch_wait).await;
            if !batch.is_empty() {
                self.processor.process_batch(batch).await;
            }
        }

        let deadline = *self.shutdown.borrow();
        let mut drained = 0;
        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            let batch = self.queue.try_dequeue_batch(self.batch_size);
            if batch.is_empty() {
                break;
            }
            drained += batch.len();
            self.processor.process_batch(batch).await;
        }
        debug!(worker = self.worker, drained, "Worker drained queue");

        info!(worker = self.worker, "{}", log_messages::processor::WORKER_STOPPED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::enrichment::Enricher;
    use crate::domain::events::{ConversationCreated, ConversationId, Event, EventId, EventKind};
    use crate::processor::dead_letter::InMemoryDeadLetterSink;
    use crate::publisher::{Delta, DeltaSink};
    use crate::store::InMemoryStore;
    use chrono::Utc;

    struct NoDeltas;

    impl DeltaSink for NoDeltas {
        fn publish(&self, _delta: Delta) {}
    }

    fn created(i: usize) -> Event {
        Event::new(
            EventId::try_new(format!("evt-{i}")).unwrap(),
            Utc::now() - chrono::Duration::minutes(1),
            EventKind::ConversationCreated(ConversationCreated::default()),
        )
        .with_conversation(ConversationId::try_new(format!("conv-{i}")).unwrap())
    }

    fn supervisor(config: ProcessorConfig, queue: Arc<IngestionQueue>) -> ProcessorSupervisor {
        let processor = Arc::new(StreamProcessor::new(
            &config,
            Enricher::default(),
            Arc::new(InMemoryStore::default()),
            Arc::new(InMemoryDeadLetterSink::new()),
            Arc::new(NoDeltas),
        ));
        ProcessorSupervisor::new(processor, queue, &config)
    }

    #[tokio::test]
    async fn workers_process_enqueued_events() {
        let queue = Arc::new(IngestionQueue::new(100));
        let config = ProcessorConfig {
            workers: 2,
            batch_size: 4,
            batch_wait: Duration::from_millis(10),
            ..ProcessorConfig::default()
        };
        let supervisor = supervisor(config, queue.clone());
        supervisor.start();

        for i in 0..10 {
            queue.enqueue(created(i)).unwrap();
        }

        let processor = supervisor.processor().clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while processor.stats().accepted < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        supervisor.stop().await;
        assert!(!supervisor.is_running());
        assert!(processor.stats().batches_processed >= 3);
    }

    #[tokio::test]
    async fn stop_drains_queued_events() {
        let queue = Arc::new(IngestionQueue::new(1_000));
        let supervisor = supervisor(
            ProcessorConfig {
                workers: 1,
                batch_size: 50,
                batch_wait: Duration::from_millis(20),
                shutdown_timeout: Duration::from_secs(5),
                ..ProcessorConfig::default()
            },
            queue.clone(),
        );

        for i in 0..500 {
            queue.enqueue(created(i)).unwrap();
        }
        supervisor.start();
        supervisor.stop().await;

        assert!(queue.is_empty());
        assert_eq!(supervisor.processor().stats().accepted, 500);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let queue = Arc::new(IngestionQueue::new(10));
        let supervisor = supervisor(ProcessorConfig::default(), queue);
        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }
}
