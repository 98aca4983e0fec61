//! Paced delivery loop.
//!
//! One scheduler drains the shared [`DeliveryQueue`]: take the oldest request, send it
//! through the governor, then wait the configured delay before the next one. An empty
//! queue parks the loop until something is enqueued (or the idle interval passes).

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::{sync::broadcast, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::SharedConfig,
    domain::{canonicalize, DeliveryRequest},
    errors::Error,
    governor::RateLimitGovernor,
    ports::{ApiRequest, ApiResponse},
    queue::{DeliveryQueue, SentLedger},
    Result,
};

/// Substring the send endpoint puts in the body of an accepted telegram.
pub const SUCCESS_MARKER: &str = "queued";

const EVENT_CAPACITY: usize = 256;

/// Outcome of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryEvent {
    Delivered {
        message_id: String,
        recipient: String,
        at: DateTime<Local>,
    },
    Failed {
        message_id: String,
        recipient: String,
        reason: String,
        at: DateTime<Local>,
    },
}

impl DeliveryEvent {
    pub fn recipient(&self) -> &str {
        match self {
            DeliveryEvent::Delivered { recipient, .. } | DeliveryEvent::Failed { recipient, .. } => {
                recipient
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryEvent::Delivered { .. })
    }
}

#[derive(Clone)]
pub struct DeliveryScheduler {
    config: SharedConfig,
    governor: Arc<RateLimitGovernor>,
    queue: DeliveryQueue,
    ledger: SentLedger,
    events: broadcast::Sender<DeliveryEvent>,
}

impl DeliveryScheduler {
    pub fn new(
        config: SharedConfig,
        governor: Arc<RateLimitGovernor>,
        queue: DeliveryQueue,
        ledger: SentLedger,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            governor,
            queue,
            ledger,
            events,
        }
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &SentLedger {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Drain the queue until `cancel` fires.
    ///
    /// Only the send itself races `cancel`. A request interrupted before any response
    /// came back goes to the head of the queue so a restarted scheduler picks it up
    /// first; once a response exists the outcome is recorded, and only the wait that
    /// follows is cut short.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("delivery scheduler started");
        loop {
            let Some(request) = self.queue.dequeue() else {
                let idle = self.config.snapshot().idle_interval;
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = self.queue.ready() => {}
                  _ = sleep(idle) => {}
                }
                continue;
            };

            let outcome = tokio::select! {
              _ = cancel.cancelled() => None,
              out = self.send(&request) => Some(out),
            };
            let Some(outcome) = outcome else {
                debug!(recipient = %request.recipient, "send interrupted, requeued");
                self.queue.restore(request);
                break;
            };

            let pacing = outcome
                .as_ref()
                .ok()
                .and_then(|resp| self.governor.pacing(resp))
                .unwrap_or_default();
            self.settle(&request, outcome);

            let pause = pacing.saturating_add(self.config.snapshot().delay());
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(pause) => {}
            }
        }
        info!(pending = self.queue.len(), "delivery scheduler stopped");
    }

    /// One delivery attempt. Never retried beyond the governor's 429 handling.
    pub async fn deliver(&self, request: &DeliveryRequest) -> DeliveryEvent {
        let outcome = self.send(request).await;
        let pacing = outcome
            .as_ref()
            .ok()
            .and_then(|resp| self.governor.pacing(resp));
        let event = self.settle(request, outcome);
        if let Some(wait) = pacing {
            sleep(wait).await;
        }
        event
    }

    async fn send(&self, request: &DeliveryRequest) -> Result<ApiResponse> {
        let client_key = self
            .config
            .snapshot()
            .client_key
            .ok_or_else(|| Error::Config("no client key provided".to_string()))?;
        let call = ApiRequest::new()
            .param("a", "sendTG")
            .param("client", client_key)
            .param("tgid", request.template.message_id.as_str())
            .param("key", request.template.secret_key.as_str())
            .param("to", canonicalize(&request.recipient));
        self.governor.send(&call).await
    }

    /// Turn a send outcome into an event: ledger on success, broadcast either way.
    fn settle(&self, request: &DeliveryRequest, outcome: Result<ApiResponse>) -> DeliveryEvent {
        let recipient = canonicalize(&request.recipient);
        let message_id = request.template.message_id.clone();

        let event = match outcome {
            Ok(resp) if resp.body.contains(SUCCESS_MARKER) => {
                self.ledger.record(&recipient);
                info!(message_id = %message_id, recipient = %request.recipient, "sent telegram");
                DeliveryEvent::Delivered {
                    message_id,
                    recipient,
                    at: Local::now(),
                }
            }
            Ok(resp) => self.failed(&message_id, &recipient, resp.body),
            Err(e) => self.failed(&message_id, &recipient, e.to_string()),
        };

        if self.events.send(event.clone()).is_err() {
            debug!("no delivery event subscribers");
        }
        event
    }

    fn failed(&self, message_id: &str, recipient: &str, reason: String) -> DeliveryEvent {
        error!(message_id, recipient, reason = %reason, "telegram failed");
        DeliveryEvent::Failed {
            message_id: message_id.to_string(),
            recipient: recipient.to_string(),
            reason,
            at: Local::now(),
        }
    }
}
