//! Explicit tag → handler registry.
//!
//! ```
//! use durable_messaging::{DispatchError, Dispatcher, HandlerRegistry};
//!
//! # tokio_test_runtime(async {
//! let registry = HandlerRegistry::new()
//!     .command("order.price", |qty: u32| async move { Ok::<_, DispatchError>(qty * 250) });
//!
//! let payload = durable_messaging::codec::encode(&4u32).unwrap();
//! let response = registry.dispatch("order.price", &payload).await.unwrap();
//! let total: u32 = durable_messaging::codec::decode(&response).unwrap();
//! assert_eq!(total, 1000);
//! # });
//! # fn tokio_test_runtime<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Dispatcher;
use crate::codec;
use crate::error::DispatchError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type CommandHandler = Box<dyn Fn(Vec<u8>) -> BoxFuture<Result<Vec<u8>, DispatchError>> + Send + Sync>;
type NotificationHandler = Box<dyn Fn(Vec<u8>) -> BoxFuture<Result<(), DispatchError>> + Send + Sync>;

/// Maps type tags to decode → handle → encode pipelines.
///
/// Commands have exactly one handler and produce a response. Notifications
/// fan out to every handler registered for the tag, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<String, CommandHandler>,
    notifications: HashMap<String, Vec<NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed command handler. Replaces any previous handler for `tag`.
    pub fn command<Req, Resp, F, Fut>(mut self, tag: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, DispatchError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.commands.insert(
            tag.to_string(),
            Box::new(move |bytes: Vec<u8>| -> BoxFuture<Result<Vec<u8>, DispatchError>> {
                let handler = handler.clone();
                Box::pin(async move {
                    let request: Req = codec::decode(&bytes)?;
                    let response = handler(request).await?;
                    codec::encode(&response)
                })
            }),
        );
        self
    }

    /// Register a command handler working on raw bytes.
    pub fn raw_command<F, Fut>(mut self, tag: &str, handler: F) -> Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, DispatchError>> + Send + 'static,
    {
        self.commands.insert(
            tag.to_string(),
            Box::new(move |bytes: Vec<u8>| -> BoxFuture<Result<Vec<u8>, DispatchError>> {
                Box::pin(handler(bytes))
            }),
        );
        self
    }

    /// Add a typed notification handler for `tag`.
    pub fn notification<N, F, Fut>(mut self, tag: &str, handler: F) -> Self
    where
        N: DeserializeOwned + Send + 'static,
        F: Fn(N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.notifications
            .entry(tag.to_string())
            .or_default()
            .push(Box::new(move |bytes: Vec<u8>| -> BoxFuture<Result<(), DispatchError>> {
                let handler = handler.clone();
                Box::pin(async move {
                    let notification: N = codec::decode(&bytes)?;
                    handler(notification).await
                })
            }));
        self
    }

    /// Add a notification handler working on raw bytes.
    pub fn raw_notification<F, Fut>(mut self, tag: &str, handler: F) -> Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        self.notifications
            .entry(tag.to_string())
            .or_default()
            .push(Box::new(move |bytes: Vec<u8>| -> BoxFuture<Result<(), DispatchError>> {
                Box::pin(handler(bytes))
            }));
        self
    }

    /// Registered command tags.
    pub fn commands(&self) -> Vec<&str> {
        self.commands.keys().map(|s| s.as_str()).collect()
    }

    /// Registered notification tags.
    pub fn notifications(&self) -> Vec<&str> {
        self.notifications.keys().map(|s| s.as_str()).collect()
    }
}

#[async_trait]
impl Dispatcher for HandlerRegistry {
    async fn dispatch(&self, type_tag: &str, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        let handler = self
            .commands
            .get(type_tag)
            .ok_or_else(|| DispatchError::UnknownType(type_tag.to_string()))?;
        handler(payload.to_vec()).await
    }

    async fn publish(&self, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        let handlers = self
            .notifications
            .get(type_tag)
            .filter(|handlers| !handlers.is_empty())
            .ok_or_else(|| DispatchError::UnknownType(type_tag.to_string()))?;

        for handler in handlers {
            handler(payload.to_vec()).await?;
        }
        Ok(())
    }
}
