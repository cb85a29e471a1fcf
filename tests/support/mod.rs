//! Shared test doubles for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use durable_messaging::{DispatchError, Dispatcher};

/// Install a tracing subscriber once per test binary. `RUST_LOG` controls output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed starting instant so time-dependent assertions are reproducible.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// A dispatched call as seen by [`RecordingDispatcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub kind: &'static str,
    pub type_tag: String,
    pub payload: Vec<u8>,
}

/// Records every call and fails the tags it has been told to fail.
///
/// Commands answer with the canned response set for their tag, or an empty
/// response.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<HashMap<String, String>>>,
    responses: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, type_tag: &str, error: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(type_tag.to_string(), error.to_string());
    }

    pub fn recover(&self, type_tag: &str) {
        self.failing.lock().unwrap().remove(type_tag);
    }

    pub fn respond(&self, type_tag: &str, response: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(type_tag.to_string(), response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.type_tag).collect()
    }

    fn record(&self, kind: &'static str, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(Call {
            kind,
            type_tag: type_tag.to_string(),
            payload: payload.to_vec(),
        });
        match self.failing.lock().unwrap().get(type_tag) {
            Some(error) => Err(DispatchError::handler(error.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, type_tag: &str, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self.record("command", type_tag, payload)?;
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(type_tag)
            .cloned()
            .unwrap_or_default())
    }

    async fn publish(&self, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        self.record("notification", type_tag, payload)
    }
}

/// Fails the first `failures` calls, then succeeds.
#[derive(Clone)]
pub struct FlakyDispatcher {
    remaining_failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyDispatcher {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(DispatchError::handler("transient failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Dispatcher for FlakyDispatcher {
    async fn dispatch(&self, _type_tag: &str, _payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self.attempt()?;
        Ok(Vec::new())
    }

    async fn publish(&self, _type_tag: &str, _payload: &[u8]) -> Result<(), DispatchError> {
        self.attempt()
    }
}
