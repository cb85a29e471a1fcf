use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::SagaError;

/// Lifecycle of a saga instance.
///
/// ```text
/// Running ──► Completed
///    │
///    ▼
/// Compensating ──► Compensated
///    │
///    ▼
///  Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    Running,
    Compensating,
    Completed,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub fn can_transition_to(self, next: SagaStatus) -> bool {
        use SagaStatus::*;
        matches!(
            (self, next),
            (Running, Completed) | (Running, Compensating) | (Compensating, Compensated) | (Compensating, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SagaStatus::Running => "running",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Completed => "completed",
            SagaStatus::Compensated => "compensated",
            SagaStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Persisted checkpoint of a saga run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: String,
    pub saga_type: String,
    /// Bitcode-encoded saga state as of the last checkpoint.
    pub state: Vec<u8>,
    pub status: SagaStatus,
    /// Number of forward steps completed.
    pub current_step: usize,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Compensations attempted so far, counted from the last completed step backwards.
    pub compensated_steps: usize,
    pub compensation_failures: usize,
    /// Incremented on every persisted update.
    pub version: u64,
}

impl SagaInstance {
    pub fn new(
        saga_id: impl Into<String>,
        saga_type: impl Into<String>,
        state: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id: saga_id.into(),
            saga_type: saga_type.into(),
            state,
            status: SagaStatus::Running,
            current_step: 0,
            started_at: now,
            last_updated_at: now,
            completed_at: None,
            last_error: None,
            compensated_steps: 0,
            compensation_failures: 0,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn decode_state<S: DeserializeOwned>(&self) -> Result<S, SagaError> {
        codec::decode(&self.state).map_err(|e| SagaError::Decode(e.to_string()))
    }

    pub(crate) fn encode_state<S: Serialize>(&mut self, state: &S) -> Result<(), SagaError> {
        self.state = codec::encode(state).map_err(|e| SagaError::Encode(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: SagaStatus) -> Result<(), SagaError> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                saga_id: self.saga_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
