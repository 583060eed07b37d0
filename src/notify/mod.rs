//! Asynchronous, best-effort notification dispatch.
//!
//! After a reservation commits, the engine hands the new request's notice to
//! a [`Notifier`], which queues it for a background worker. The worker calls
//! the configured [`NotificationSink`] with bounded exponential-backoff
//! retries. Nothing on this path can change the caller-visible outcome of the
//! reservation: a full queue drops the notice, a dead sink exhausts its
//! retries, and both are only logged.

mod webhook;

pub use webhook::WebhookSink;

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::NotifierConfig;
use crate::domain::{ProfileId, RequestId};

/// Payload delivered to the counterparty after a committed `create_request`.
///
/// The seller's contact token is resolved inside the creating transaction, so
/// the worker never needs database access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestNotice {
    pub request_id: RequestId,
    pub seller_id: ProfileId,
    pub contact_token: Option<String>,
}

/// Why a delivery attempt failed.
///
/// The distinction drives the retry policy: `Transient` failures are retried
/// with backoff, `Rejected` deliveries are dropped immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Network error, timeout, or overloaded channel; worth retrying.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The destination rejected the notice (e.g. malformed contact token);
    /// retrying cannot succeed.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Trait for delivering notices to the counterparty.
///
/// This abstraction allows different channels (webhook, push gateway) in
/// production and a recording mock in tests.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Attempt one delivery of the notice.
    async fn deliver(&self, notice: &RequestNotice) -> Result<(), DeliveryError>;
}

/// Handle for enqueueing notices onto the background worker.
///
/// Cheap to clone; all clones feed the same queue. Created together with the
/// worker task by [`Notifier::spawn`].
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<RequestNotice>,
}

impl Notifier {
    /// Spawn the background delivery worker and return its handle.
    ///
    /// The worker runs until `shutdown` is cancelled or every [`Notifier`]
    /// clone is dropped (which closes the queue).
    pub fn spawn<S: NotificationSink + 'static>(
        sink: Arc<S>,
        config: NotifierConfig,
        shutdown: CancellationToken,
    ) -> (Notifier, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = tokio::spawn(run_worker(sink, config, rx, shutdown));
        (Notifier { tx }, handle)
    }

    /// Queue a notice for delivery. Never blocks and never fails the caller:
    /// if the queue is full the notice is dropped with a warning.
    pub fn enqueue(&self, notice: RequestNotice) {
        if let Err(e) = self.tx.try_send(notice) {
            counter!("keyturn_notifications_total", "outcome" => "dropped").increment(1);
            tracing::warn!(error = %e, "Notification queue full, dropping notice");
        }
    }
}

async fn run_worker<S: NotificationSink>(
    sink: Arc<S>,
    config: NotifierConfig,
    mut rx: mpsc::Receiver<RequestNotice>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            maybe_notice = rx.recv() => {
                match maybe_notice {
                    Some(notice) => deliver_with_retries(&*sink, &config, notice, &shutdown).await,
                    None => {
                        tracing::debug!("Notification queue closed, stopping worker");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown signal received, stopping notification worker");
                break;
            }
        }
    }
}

#[tracing::instrument(skip(sink, config, shutdown), fields(request_id = %notice.request_id, seller_id = %notice.seller_id))]
async fn deliver_with_retries<S: NotificationSink + ?Sized>(
    sink: &S,
    config: &NotifierConfig,
    notice: RequestNotice,
    shutdown: &CancellationToken,
) {
    for attempt in 1..=config.max_attempts {
        match sink.deliver(&notice).await {
            Ok(()) => {
                counter!("keyturn_notifications_total", "outcome" => "delivered").increment(1);
                tracing::info!(attempt, "Notification delivered");
                return;
            }
            Err(DeliveryError::Rejected(reason)) => {
                counter!("keyturn_notifications_total", "outcome" => "rejected").increment(1);
                tracing::warn!(attempt, reason, "Notification rejected, not retrying");
                return;
            }
            Err(DeliveryError::Transient(reason)) => {
                if attempt == config.max_attempts {
                    counter!("keyturn_notifications_total", "outcome" => "exhausted").increment(1);
                    tracing::warn!(
                        attempt,
                        reason,
                        max_attempts = config.max_attempts,
                        "Notification delivery exhausted retries, giving up"
                    );
                    return;
                }
                let backoff = config.backoff_for_retry(attempt - 1);
                tracing::debug!(
                    attempt,
                    reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transient delivery failure, backing off before retry"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Shutdown during backoff, abandoning notice");
                        return;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;

/// Mock notification sink for testing.
///
/// Records every delivery attempt and can be scripted with a FIFO queue of
/// outcomes; once the queue is empty, attempts succeed.
#[derive(Default)]
pub struct MockNotificationSink {
    outcomes: Mutex<Vec<Result<(), DeliveryError>>>,
    attempts: Mutex<Vec<RequestNotice>>,
    delivered: Mutex<Vec<RequestNotice>>,
}

impl MockNotificationSink {
    /// Create a new mock sink where every delivery succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next unscripted delivery attempt. Outcomes
    /// are consumed in FIFO order.
    pub fn push_outcome(&self, outcome: Result<(), DeliveryError>) {
        self.outcomes.lock().push(outcome);
    }

    /// All attempts made against this sink, successful or not.
    pub fn attempts(&self) -> Vec<RequestNotice> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Notices that were successfully delivered.
    pub fn delivered(&self) -> Vec<RequestNotice> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl NotificationSink for MockNotificationSink {
    async fn deliver(&self, notice: &RequestNotice) -> Result<(), DeliveryError> {
        self.attempts.lock().push(notice.clone());
        let outcome = {
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        };
        if outcome.is_ok() {
            self.delivered.lock().push(notice.clone());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> NotifierConfig {
        NotifierConfig {
            queue_capacity: 8,
            max_attempts: 3,
            backoff_ms: 1,
            backoff_factor: 2,
            max_backoff_ms: 5,
        }
    }

    fn notice() -> RequestNotice {
        RequestNotice {
            request_id: RequestId::new(),
            seller_id: ProfileId::new(),
            contact_token: Some("token-1".to_string()),
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        let start = tokio::time::Instant::now();
        while !condition() {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn enqueued_notice_is_delivered_once() {
        let sink = Arc::new(MockNotificationSink::new());
        let shutdown = CancellationToken::new();
        let (notifier, handle) = Notifier::spawn(sink.clone(), fast_config(), shutdown.clone());

        let n = notice();
        notifier.enqueue(n.clone());

        wait_for(|| sink.delivered_count() == 1).await;
        assert_eq!(sink.attempt_count(), 1);
        assert_eq!(sink.delivered()[0], n);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_exhausted() {
        let sink = Arc::new(MockNotificationSink::new());
        for _ in 0..3 {
            sink.push_outcome(Err(DeliveryError::Transient("sink down".to_string())));
        }
        let shutdown = CancellationToken::new();
        let (notifier, handle) = Notifier::spawn(sink.clone(), fast_config(), shutdown.clone());

        notifier.enqueue(notice());

        // All three attempts consumed, nothing delivered.
        wait_for(|| sink.attempt_count() == 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.attempt_count(), 3);
        assert_eq!(sink.delivered_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_then_success_stops_retrying() {
        let sink = Arc::new(MockNotificationSink::new());
        sink.push_outcome(Err(DeliveryError::Transient("blip".to_string())));
        let shutdown = CancellationToken::new();
        let (notifier, handle) = Notifier::spawn(sink.clone(), fast_config(), shutdown.clone());

        notifier.enqueue(notice());

        wait_for(|| sink.delivered_count() == 1).await;
        assert_eq!(sink.attempt_count(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_delivery_is_never_retried() {
        let sink = Arc::new(MockNotificationSink::new());
        sink.push_outcome(Err(DeliveryError::Rejected("bad token".to_string())));
        let shutdown = CancellationToken::new();
        let (notifier, handle) = Notifier::spawn(sink.clone(), fast_config(), shutdown.clone());

        notifier.enqueue(notice());
        notifier.enqueue(notice());

        // Second notice delivered; first got exactly one attempt.
        wait_for(|| sink.delivered_count() == 1).await;
        assert_eq!(sink.attempt_count(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_stops_when_all_notifiers_drop() {
        let sink = Arc::new(MockNotificationSink::new());
        let shutdown = CancellationToken::new();
        let (notifier, handle) = Notifier::spawn(sink.clone(), fast_config(), shutdown);

        drop(notifier);
        handle.await.unwrap();
    }
}
