use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_common::health::HealthHandle;
use bridge_common::kafka_consumer::{ConsumeError, UpdateConsumer};
use bridge_common::messages::{decode, UpdateMessage};
use bridge_common::solr::{SearchBackend, SolrError};

/// Applies decoded bus messages as search-engine mutations.
///
/// Commits are issued only after deletions; adds rely on the engine's
/// autocommit.
pub struct SolrUpdater<B> {
    backend: B,
}

impl<B: SearchBackend> SolrUpdater<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn apply(&self, message: &UpdateMessage) -> Result<(), SolrError> {
        match message {
            UpdateMessage::Updated(docs) => {
                debug!(documents = docs.len(), "sending update to solr");
                self.backend.add_documents(docs).await
            }
            UpdateMessage::Deleted(ids) => {
                for id in ids {
                    debug!(%id, "deleting document");
                    self.backend.delete_by_id(id).await?;
                }
                self.backend.commit().await
            }
            UpdateMessage::DeletedDb(database) => {
                info!(%database, "deleting indexes for database");
                self.backend
                    .delete_by_query(&format!("_db:{database}"))
                    .await?;
                self.backend.commit().await
            }
        }
    }
}

/// Consumes bus messages and processes them on a bounded pool of tasks.
///
/// Messages are acknowledged at receipt (auto-committed offsets), so a
/// processing failure drops that update rather than redelivering it.
pub struct UpdateWorker<B> {
    consumer: UpdateConsumer,
    updater: Arc<SolrUpdater<B>>,
    max_concurrent_jobs: usize,
    liveness: HealthHandle,
}

impl<B: SearchBackend + Send + Sync + 'static> UpdateWorker<B> {
    pub fn new(
        consumer: UpdateConsumer,
        updater: SolrUpdater<B>,
        max_concurrent_jobs: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            updater: Arc::new(updater),
            max_concurrent_jobs,
            liveness,
        }
    }

    /// Run until cancelled, then drain in-flight work before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            metrics::gauge!("updater_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_jobs as f64,
            );

            let payload = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    self.liveness.report_healthy();
                    continue;
                }
                received = self.consumer.recv() => match received {
                    Ok(payload) => payload,
                    Err(ConsumeError::EmptyPayload) => {
                        warn!("dropping message with an empty payload");
                        continue;
                    }
                    Err(ConsumeError::Kafka(err)) => {
                        // Recoverable: keep the process up and let the
                        // consumer re-poll once the broker is back.
                        error!(error = %err, "problem consuming from the message bus");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            spawn_update_task(self.updater.clone(), semaphore.clone(), payload).await;
        }

        info!("waiting for in-flight updates to finish");
        drop(
            semaphore
                .acquire_many(self.max_concurrent_jobs as u32)
                .await
                .expect("semaphore has been closed"),
        );
    }
}

/// Spawn a task to process one message once a pool permit is acquired.
/// Waiting for the permit here is what bounds concurrency: receipt of further
/// messages pauses while all workers are busy.
async fn spawn_update_task<B: SearchBackend + Send + Sync + 'static>(
    updater: Arc<SolrUpdater<B>>,
    semaphore: Arc<Semaphore>,
    payload: Vec<u8>,
) -> tokio::task::JoinHandle<()> {
    let permit = semaphore
        .acquire_owned()
        .await
        .expect("semaphore has been closed");

    metrics::counter!("updater_messages_total").increment(1);

    tokio::spawn(async move {
        process_payload(&updater, &payload).await;
        drop(permit);
    })
}

/// Decode and apply one message. Every failure is logged and contained here;
/// nothing propagates out of a worker task.
async fn process_payload<B: SearchBackend>(updater: &SolrUpdater<B>, payload: &[u8]) {
    let message = match decode(payload) {
        Ok(Some(message)) => message,
        Ok(None) => {
            warn!("unrecognized update type, dropping message");
            metrics::counter!("updater_messages_dropped_total", "reason" => "unknown_type")
                .increment(1);
            return;
        }
        Err(error) => {
            warn!(%error, "failed to parse update payload, dropping message");
            metrics::counter!("updater_messages_dropped_total", "reason" => "malformed")
                .increment(1);
            return;
        }
    };

    let start = tokio::time::Instant::now();
    match updater.apply(&message).await {
        Ok(()) => {
            metrics::histogram!("updater_apply_duration_seconds")
                .record(start.elapsed().as_secs_f64());
        }
        Err(error) => {
            error!(%error, "failed to apply update");
            metrics::counter!("updater_messages_failed_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use bridge_common::messages::IndexableField;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add(usize),
        DeleteId(String),
        DeleteQuery(String),
        Commit,
    }

    /// Backend that records calls, tracks peak concurrency, and can be told
    /// to fail or to dawdle.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<Call>>,
        fail: AtomicBool,
        delay: Option<Duration>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RecordingBackend {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: Call) -> Result<(), SolrError> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SolrError::Rejected {
                    status: http::StatusCode::INTERNAL_SERVER_ERROR,
                    detail: "scripted failure".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SearchBackend for RecordingBackend {
        async fn add_documents(
            &self,
            docs: &[bridge_common::messages::DocumentFields],
        ) -> Result<(), SolrError> {
            self.record(Call::Add(docs.len())).await
        }

        async fn delete_by_id(&self, id: &str) -> Result<(), SolrError> {
            self.record(Call::DeleteId(id.to_owned())).await
        }

        async fn delete_by_query(&self, query: &str) -> Result<(), SolrError> {
            self.record(Call::DeleteQuery(query.to_owned())).await
        }

        async fn commit(&self) -> Result<(), SolrError> {
            self.record(Call::Commit).await
        }
    }

    fn updater() -> SolrUpdater<Arc<RecordingBackend>> {
        SolrUpdater::new(Arc::new(RecordingBackend::default()))
    }

    #[tokio::test]
    async fn updated_messages_add_without_commit() {
        let updater = updater();
        let message = UpdateMessage::Updated(vec![
            vec![IndexableField::new("title", "a")],
            vec![IndexableField::new("title", "b")],
        ]);

        updater.apply(&message).await.unwrap();
        assert_eq!(updater.backend.calls(), vec![Call::Add(2)]);
    }

    #[tokio::test]
    async fn updated_messages_are_safe_to_reapply() {
        let updater = updater();
        let message = UpdateMessage::Updated(vec![vec![IndexableField::new("_id", "d1")]]);

        updater.apply(&message).await.unwrap();
        updater.apply(&message).await.unwrap();
        assert_eq!(updater.backend.calls(), vec![Call::Add(1), Call::Add(1)]);
    }

    #[tokio::test]
    async fn deleted_messages_commit_once_after_all_deletes() {
        let updater = updater();
        let message = UpdateMessage::Deleted(vec!["a".to_owned(), "b".to_owned()]);

        updater.apply(&message).await.unwrap();
        assert_eq!(
            updater.backend.calls(),
            vec![
                Call::DeleteId("a".to_owned()),
                Call::DeleteId("b".to_owned()),
                Call::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn deleted_db_messages_delete_by_query_then_commit() {
        let updater = updater();
        updater
            .apply(&UpdateMessage::DeletedDb("mydb".to_owned()))
            .await
            .unwrap();
        assert_eq!(
            updater.backend.calls(),
            vec![Call::DeleteQuery("_db:mydb".to_owned()), Call::Commit]
        );
    }

    #[tokio::test]
    async fn unknown_message_types_touch_nothing() {
        let updater = updater();
        process_payload(&updater, br#"{"type": "bogus", "data": []}"#).await;
        assert!(updater.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_payloads_touch_nothing() {
        let updater = updater();
        process_payload(&updater, b"not json").await;
        assert!(updater.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn engine_failures_are_contained() {
        let updater = updater();
        updater.backend.fail.store(true, Ordering::SeqCst);

        let payload = serde_json::to_vec(&UpdateMessage::DeletedDb("mydb".to_owned())).unwrap();
        // Must not panic or propagate; the message is simply dropped.
        process_payload(&updater, &payload).await;
        assert_eq!(
            updater.backend.calls(),
            vec![Call::DeleteQuery("_db:mydb".to_owned())]
        );
    }

    #[tokio::test]
    async fn pool_concurrency_is_bounded_by_the_semaphore() {
        let backend = Arc::new(RecordingBackend::slow(Duration::from_millis(20)));
        let updater = Arc::new(SolrUpdater::new(backend.clone()));
        let semaphore = Arc::new(Semaphore::new(2));

        let payload =
            serde_json::to_vec(&UpdateMessage::DeletedDb("mydb".to_owned())).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(
                spawn_update_task(updater.clone(), semaphore.clone(), payload.clone()).await,
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Two engine calls per message, all eight processed, never more than
        // two messages in flight at once.
        assert_eq!(backend.calls().len(), 16);
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    }
}
