use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::application::retention::RetentionTask;
use crate::config::Settings;
use crate::domain::enrichment::Enricher;
use crate::domain::events::Event;
use crate::domain::metrics::RetentionDays;
use crate::infrastructure::log_messages;
use crate::ingestion::{IngestionQueue, QueueStats};
use crate::processor::{
    check_event, DeadLetterSink, HealthStatus, InMemoryDeadLetterSink, JsonLinesDeadLetterSink,
    ProcessorStats, ProcessorSupervisor, StreamProcessor,
};
use crate::publisher::{
    ChannelName, DeltaBatch, PublisherError, PublisherStats, RealTimePublisher, SubscriptionId,
};
use crate::query::QueryEngine;
use crate::store::{InMemoryStore, TimeSeriesStore};
use crate::{Error, Result};

/// Wires queue, processor workers, store, publisher and query engine together
pub struct Application {
    settings: Settings,
    queue: Arc<IngestionQueue>,
    store: Arc<dyn TimeSeriesStore>,
    supervisor: ProcessorSupervisor,
    publisher: Arc<RealTimePublisher>,
    query: QueryEngine,
    retention: RetentionDays,
    retention_task: parking_lot::Mutex<Option<RetentionTask>>,
    accepting: AtomicBool,
    max_clock_skew: Duration,
}

impl Application {
    /// Load settings and build the pipeline over the in-memory store
    #[instrument]
    pub async fn new() -> Result<Self> {
        info!("{}", log_messages::configuration::LOADING_CONFIG);
        let settings = Settings::new()?;
        info!(
            environment = %settings.environment,
            "{}",
            log_messages::configuration::CONFIG_LOADED
        );
        Self::build(settings)
    }

    pub fn build(settings: Settings) -> Result<Self> {
        let store: Arc<dyn TimeSeriesStore> = Arc::new(InMemoryStore::new(settings.store_config()));
        Self::build_with_store(settings, store)
    }

    /// Build the pipeline over a caller-supplied store backend
    pub fn build_with_store(settings: Settings, store: Arc<dyn TimeSeriesStore>) -> Result<Self> {
        let retention = settings.retention()?;
        let processor_config = settings.processor_config();

        let dead_letters: Arc<dyn DeadLetterSink> = match &settings.processor.dead_letter_path {
            Some(path) => Arc::new(JsonLinesDeadLetterSink::new(path)),
            None => Arc::new(InMemoryDeadLetterSink::new()),
        };
        let publisher = Arc::new(RealTimePublisher::new(settings.publisher_config()));
        let enricher = Enricher::new(
            Arc::new(settings.rate_table()),
            Arc::new(settings.engagement_model()),
        );
        let processor = Arc::new(StreamProcessor::new(
            &processor_config,
            enricher,
            store.clone(),
            dead_letters,
            publisher.clone(),
        ));
        let queue = Arc::new(IngestionQueue::new(settings.ingestion.capacity));
        let supervisor = ProcessorSupervisor::new(processor, queue.clone(), &processor_config);
        let query = QueryEngine::new(store.clone(), &settings.query_cache_config());

        Ok(Self {
            queue,
            store,
            supervisor,
            publisher,
            query,
            retention,
            retention_task: parking_lot::Mutex::new(None),
            accepting: AtomicBool::new(false),
            max_clock_skew: processor_config.max_clock_skew,
            settings,
        })
    }

    /// Start workers, the publisher flush timer and the retention task
    #[instrument(skip(self))]
    pub fn start(&self) {
        info!("{}", log_messages::application::STARTING);
        self.publisher.start();
        self.supervisor.start();

        let mut retention_task = self.retention_task.lock();
        if retention_task.is_none() {
            if let Some(interval) = self.settings.cleanup_interval() {
                *retention_task = Some(RetentionTask::spawn(
                    self.store.clone(),
                    self.retention,
                    interval,
                ));
            }
        }

        self.accepting.store(true, Ordering::Release);
        info!("{}", log_messages::application::STARTED_SUCCESSFULLY);
    }

    /// Validate and enqueue one event
    ///
    /// Validation errors are returned synchronously. A full queue is waited on
    /// for at most the configured enqueue timeout.
    pub async fn submit(&self, event: Event) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        check_event(&event, Utc::now(), self.max_clock_skew)?;
        self.queue
            .enqueue_with_wait(event, self.settings.enqueue_timeout())
            .await?;
        Ok(())
    }

    /// Parse an event from its JSON boundary representation and submit it
    pub async fn submit_json(&self, json: &str) -> Result<()> {
        let event = Event::from_json(json)?;
        self.submit(event).await
    }

    pub fn subscribe<F>(&self, channel: &str, on_batch: F) -> Result<SubscriptionId>
    where
        F: Fn(DeltaBatch) + Send + Sync + 'static,
    {
        let channel = ChannelName::try_new(channel).map_err(PublisherError::from)?;
        Ok(self.publisher.subscribe(channel, on_batch))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        Ok(self.publisher.unsubscribe(id)?)
    }

    /// Remove every subscription on `channel`
    pub fn unsubscribe_channel(&self, channel: &str) -> Result<usize> {
        let channel = ChannelName::try_new(channel).map_err(PublisherError::from)?;
        Ok(self.publisher.unsubscribe_channel(&channel))
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn store(&self) -> &Arc<dyn TimeSeriesStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<StreamProcessor> {
        self.supervisor.processor()
    }

    pub fn health(&self) -> watch::Receiver<HealthStatus> {
        self.processor().health()
    }

    pub fn processor_stats(&self) -> ProcessorStats {
        self.processor().stats()
    }

    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Cooperative shutdown
    ///
    /// Stops accepting events, lets workers finish and drain the queue within
    /// the shutdown timeout, then flushes publisher buffers.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("{}", log_messages::application::SHUTDOWN_REQUESTED);
        self.accepting.store(false, Ordering::Release);
        self.supervisor.stop().await;
        self.publisher.stop().await;
        let retention_task = self.retention_task.lock().take();
        if let Some(task) = retention_task {
            task.stop().await;
        }
        info!("{}", log_messages::application::SHUTDOWN_COMPLETE);
    }

    /// Run until ctrl-c or until the processor reports fatal health
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        self.start();
        let mut health = self.health();

        let fatal = loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for ctrl-c: {}", e);
                    }
                    break false;
                }
                changed = health.changed() => {
                    if changed.is_err() {
                        break false;
                    }
                    let status = *health.borrow_and_update();
                    warn!(%status, "{}", log_messages::application::HEALTH_CHANGED);
                    if status == HealthStatus::Failed {
                        break true;
                    }
                }
            }
        };

        self.shutdown().await;
        if fatal {
            error!("{}", log_messages::application::FATAL_HEALTH);
            return Err(Error::ProcessorFailed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("environment", &self.settings.environment)
            .field("supervisor", &self.supervisor)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        ConversationCreated, ConversationId, EventId, EventKind, MessageRole, MessageSent,
    };

    fn settings() -> Settings {
        let mut settings = Settings::defaults_only().unwrap();
        settings.processor.batch_wait_ms = 10;
        settings.store.cleanup_interval_secs = 0;
        settings
    }

    #[tokio::test]
    async fn rejects_events_before_start() {
        let app = Application::build(settings()).unwrap();
        let event = Event::new(
            EventId::try_new("e-1").unwrap(),
            Utc::now(),
            EventKind::ConversationCreated(ConversationCreated::default()),
        );
        assert!(matches!(app.submit(event).await, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn validation_errors_are_synchronous() {
        let app = Application::build(settings()).unwrap();
        app.start();

        let missing_conversation = Event::new(
            EventId::try_new("e-1").unwrap(),
            Utc::now(),
            EventKind::MessageSent(MessageSent {
                role: MessageRole::User,
                content_length: 10,
                model: None,
            }),
        );
        let err = app.submit(missing_conversation).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.is_caller_error());

        app.shutdown().await;
    }

    #[tokio::test]
    async fn submitted_events_reach_the_store_and_subscribers() {
        let app = Application::build(settings()).unwrap();
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = received.clone();
        app.subscribe("conversation:c-1", move |batch| {
            sink.lock().extend(batch.updates);
        })
        .unwrap();
        app.start();

        let event = Event::new(
            EventId::try_new("e-1").unwrap(),
            Utc::now() - chrono::Duration::seconds(1),
            EventKind::ConversationCreated(ConversationCreated::default()),
        )
        .with_conversation(ConversationId::try_new("c-1").unwrap());
        app.submit(event).await.unwrap();
        app.shutdown().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while received.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(app.processor_stats().accepted, 1);
        assert_eq!(received.lock().len(), 1);
        assert!(matches!(
            app.submit_json("{}").await,
            Err(Error::ShuttingDown | Error::Serialization(_))
        ));
    }

    #[test]
    fn invalid_channel_names_are_rejected() {
        let app = Application::build(settings()).unwrap();
        let err = app.subscribe("nonsense", |_| {}).unwrap_err();
        assert!(matches!(err, Error::Publisher(PublisherError::InvalidChannel(_))));
    }
}
