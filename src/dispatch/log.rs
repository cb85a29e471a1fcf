use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use tracing::info;

use super::Dispatcher;
use crate::error::DispatchError;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A dispatcher that logs every command and notification it receives.
///
/// Lines go to an in-memory buffer when one is attached, otherwise to
/// `tracing` at info level. Commands answer with an empty response.
#[derive(Clone, Default)]
pub struct LogDispatcher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogDispatcher {
    pub fn new() -> Self {
        Self { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    fn record(&self, kind: &str, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        let rendered = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(_) => format!("base64:{}", BASE64.encode(payload)),
        };
        let line = format!("[{}] {} {}", kind, type_tag, rendered);

        match &self.buffer {
            Some(buffer) => {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| DispatchError::handler("log dispatcher buffer poisoned"))?;
                buffer.push(line);
            }
            None => info!(kind = kind, type_tag = type_tag, payload = %rendered, "Dispatched"),
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, type_tag: &str, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self.record("COMMAND", type_tag, payload)?;
        Ok(Vec::new())
    }

    async fn publish(&self, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        self.record("NOTIFICATION", type_tag, payload)
    }
}
