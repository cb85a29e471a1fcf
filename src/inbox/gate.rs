use std::future::Future;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{InboxItem, InboxStore};
use crate::codec;
use crate::config::InboxConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, InboxError, StoreError};

/// Result of checking a message id against the inbox.
enum Admission {
    /// Already handled: serve this response without running the handler.
    Cached(Vec<u8>),
    /// Run the handler; `retry_count` is the number of earlier failed attempts.
    Run { retry_count: u32 },
}

/// Idempotency gate wrapped around inbound request handling.
///
/// The first successful delivery of a message id runs the handler and
/// caches its encoded response. Every later delivery of the same id gets
/// the cached bytes back without the handler running again. A failed
/// attempt is recorded and surfaced; the next redelivery retries it.
pub struct InboxGate<S> {
    store: S,
    config: InboxConfig,
}

impl<S: InboxStore> InboxGate<S> {
    pub fn new(store: S, config: InboxConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `handler` at most once per `message_id` and return its response.
    pub async fn process<F, Fut>(
        &self,
        message_id: &str,
        request_type: &str,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InboxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, DispatchError>>,
    {
        self.process_at(Utc::now(), message_id, request_type, handler, cancel)
            .await
    }

    /// [`process`](Self::process) as of `now`.
    pub async fn process_at<F, Fut>(
        &self,
        now: DateTime<Utc>,
        message_id: &str,
        request_type: &str,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InboxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, DispatchError>>,
    {
        if cancel.is_cancelled() {
            return Err(InboxError::Cancelled(message_id.to_string()));
        }

        let retry_count = match self.admit(now, message_id, request_type).await? {
            Admission::Cached(response) => {
                debug!(message_id, request_type, "Duplicate message, serving cached response");
                return Ok(response);
            }
            Admission::Run { retry_count } => retry_count,
        };

        // Dropping the handler on cancellation leaves the record unprocessed,
        // so the next delivery runs it again.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(InboxError::Cancelled(message_id.to_string()));
            }
            outcome = handler() => outcome,
        };

        match outcome {
            Ok(response) => {
                self.store
                    .mark_processed(message_id, response.clone(), now)
                    .await?;
                debug!(message_id, request_type, "Inbox message processed");

                // A concurrent delivery may have stored its response first.
                let stored = self
                    .store
                    .get(message_id)
                    .await?
                    .and_then(|item| item.cached_response);
                Ok(stored.unwrap_or(response))
            }
            Err(source) => {
                let attempt = retry_count.saturating_add(1);
                let next_retry_at = self.config.retry.next_retry_at(attempt, now);
                self.store
                    .mark_failed(message_id, &source.to_string(), next_retry_at)
                    .await?;
                warn!(
                    message_id,
                    request_type,
                    retry_count = attempt,
                    error = %source,
                    "Inbox handler failed"
                );
                Err(InboxError::Handler {
                    message_id: message_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Like [`process`](Self::process) for a handler returning a typed value.
    /// The value is cached bitcode-encoded and decoded on every return.
    pub async fn process_typed<T, F, Fut>(
        &self,
        message_id: &str,
        request_type: &str,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<T, InboxError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let bytes = self
            .process(
                message_id,
                request_type,
                || async move {
                    let value = handler().await?;
                    codec::encode(&value)
                },
                cancel,
            )
            .await?;
        codec::decode(&bytes).map_err(|e| InboxError::Decode(e.to_string()))
    }

    /// Route a command through `dispatcher`, guarded by the inbox.
    pub async fn dispatch<D>(
        &self,
        message_id: &str,
        type_tag: &str,
        payload: &[u8],
        dispatcher: &D,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InboxError>
    where
        D: Dispatcher + ?Sized,
    {
        self.process(
            message_id,
            type_tag,
            || dispatcher.dispatch(type_tag, payload),
            cancel,
        )
        .await
    }

    async fn admit(
        &self,
        now: DateTime<Utc>,
        message_id: &str,
        request_type: &str,
    ) -> Result<Admission, StoreError> {
        if let Some(item) = self.store.get(message_id).await? {
            return Ok(admission_for(item));
        }

        let item = InboxItem::new(message_id, request_type, now, self.config.retention_period);
        match self.store.add(item).await {
            Ok(()) => Ok(Admission::Run { retry_count: 0 }),
            Err(StoreError::Duplicate { .. }) => {
                // Lost the race against a concurrent first delivery.
                match self.store.get(message_id).await? {
                    Some(item) => Ok(admission_for(item)),
                    None => Ok(Admission::Run { retry_count: 0 }),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn admission_for(item: InboxItem) -> Admission {
    if item.is_processed() {
        Admission::Cached(item.cached_response.unwrap_or_default())
    } else {
        Admission::Run {
            retry_count: item.retry_count,
        }
    }
}
