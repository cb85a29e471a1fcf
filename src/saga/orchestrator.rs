use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SagaDefinition, SagaInstance, SagaStatus, SagaStore};
use crate::dispatch::Dispatcher;
use crate::error::{SagaError, StoreError};

/// Drives saga definitions step by step, checkpointing after every step.
///
/// A run that is interrupted (crash, cancellation, store error) can be
/// resumed by calling [`run`](Self::run) again with the same saga id:
/// completed forward steps are never re-run and compensations already
/// attempted are never repeated.
pub struct SagaOrchestrator<St, D> {
    store: St,
    dispatcher: D,
}

impl<St, D> SagaOrchestrator<St, D>
where
    St: SagaStore,
    D: Dispatcher,
{
    pub fn new(store: St, dispatcher: D) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Run (or resume) `saga_id` to a terminal status.
    ///
    /// `initial` is only used when no instance exists yet. Step and
    /// compensation failures are recorded on the returned instance; an `Err`
    /// means the run stopped early and can be resumed.
    pub async fn run<S>(
        &self,
        definition: &SagaDefinition<S>,
        saga_id: &str,
        initial: S,
        cancel: &CancellationToken,
    ) -> Result<SagaInstance, SagaError>
    where
        S: Serialize + DeserializeOwned + Send,
    {
        let mut instance = self.load_or_create(definition, saga_id, &initial).await?;
        if instance.is_terminal() {
            debug!(saga_id, status = %instance.status, "Saga already finished");
            return Ok(instance);
        }

        let steps = definition.len();
        if instance.current_step > steps || instance.compensated_steps > instance.current_step {
            return Err(SagaError::StepOutOfRange {
                saga_id: saga_id.to_string(),
                step: instance.current_step,
                steps,
            });
        }

        let mut state: S = instance.decode_state()?;

        if instance.status == SagaStatus::Running {
            self.run_forward(definition, &mut instance, &mut state, cancel)
                .await?;
            if instance.status == SagaStatus::Completed {
                return Ok(instance);
            }
        }

        self.run_compensation(definition, &mut instance, &mut state, cancel)
            .await?;
        Ok(instance)
    }

    async fn load_or_create<S>(
        &self,
        definition: &SagaDefinition<S>,
        saga_id: &str,
        initial: &S,
    ) -> Result<SagaInstance, SagaError>
    where
        S: Serialize,
    {
        let existing = match self.store.get(saga_id).await? {
            Some(instance) => Some(instance),
            None => {
                let mut instance =
                    SagaInstance::new(saga_id, definition.saga_type(), Vec::new(), Utc::now());
                instance.encode_state(initial)?;
                match self.store.create(instance.clone()).await {
                    Ok(()) => {
                        info!(saga_id, saga_type = definition.saga_type(), "Saga started");
                        return Ok(instance);
                    }
                    Err(StoreError::Duplicate { .. }) => self.store.get(saga_id).await?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let instance = existing.ok_or_else(|| StoreError::NotFound {
            kind: "saga",
            id: saga_id.to_string(),
        })?;
        if instance.saga_type != definition.saga_type() {
            return Err(SagaError::DefinitionMismatch {
                saga_id: saga_id.to_string(),
                expected: definition.saga_type().to_string(),
                actual: instance.saga_type,
            });
        }
        if !instance.is_terminal() {
            info!(
                saga_id,
                status = %instance.status,
                step = instance.current_step,
                "Resuming saga"
            );
        }
        Ok(instance)
    }

    async fn run_forward<S>(
        &self,
        definition: &SagaDefinition<S>,
        instance: &mut SagaInstance,
        state: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), SagaError>
    where
        S: Serialize + DeserializeOwned + Send,
    {
        while instance.current_step < definition.len() {
            if cancel.is_cancelled() {
                return Err(SagaError::Cancelled(instance.saga_id.clone()));
            }

            let step = &definition.steps()[instance.current_step];
            match step.forward().run(state, &self.dispatcher).await {
                Ok(()) => {
                    instance.encode_state(state)?;
                    instance.current_step += 1;
                    self.persist(instance).await?;
                    debug!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        "Saga step completed"
                    );
                }
                Err(e) => {
                    warn!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        error = %e,
                        "Saga step failed, compensating"
                    );
                    *state = instance.decode_state()?;
                    instance.last_error = Some(format!("step {} failed: {}", step.name(), e));
                    instance.transition(SagaStatus::Compensating)?;
                    self.persist(instance).await?;
                    return Ok(());
                }
            }
        }

        instance.transition(SagaStatus::Completed)?;
        instance.completed_at = Some(Utc::now());
        self.persist(instance).await?;
        info!(saga_id = %instance.saga_id, "Saga completed");
        Ok(())
    }

    async fn run_compensation<S>(
        &self,
        definition: &SagaDefinition<S>,
        instance: &mut SagaInstance,
        state: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), SagaError>
    where
        S: Serialize + DeserializeOwned + Send,
    {
        while instance.compensated_steps < instance.current_step {
            if cancel.is_cancelled() {
                return Err(SagaError::Cancelled(instance.saga_id.clone()));
            }

            let index = instance.current_step - 1 - instance.compensated_steps;
            let step = &definition.steps()[index];
            if let Some(compensation) = step.compensation() {
                match compensation.run(state, &self.dispatcher).await {
                    Ok(()) => {
                        instance.encode_state(state)?;
                        debug!(
                            saga_id = %instance.saga_id,
                            step = step.name(),
                            "Saga step compensated"
                        );
                    }
                    Err(e) => {
                        error!(
                            saga_id = %instance.saga_id,
                            step = step.name(),
                            error = %e,
                            "Saga compensation failed"
                        );
                        *state = instance.decode_state()?;
                        instance.compensation_failures += 1;
                        instance.last_error =
                            Some(format!("compensation of {} failed: {}", step.name(), e));
                    }
                }
            }

            instance.compensated_steps += 1;
            self.persist(instance).await?;
        }

        let outcome = if instance.compensation_failures > 0 {
            SagaStatus::Failed
        } else {
            SagaStatus::Compensated
        };
        instance.transition(outcome)?;
        instance.completed_at = Some(Utc::now());
        self.persist(instance).await?;

        if outcome == SagaStatus::Failed {
            error!(
                saga_id = %instance.saga_id,
                failures = instance.compensation_failures,
                "Saga rollback incomplete"
            );
        } else {
            info!(saga_id = %instance.saga_id, "Saga compensated");
        }
        Ok(())
    }

    async fn persist(&self, instance: &mut SagaInstance) -> Result<(), SagaError> {
        let expected = instance.version;
        instance.version += 1;
        instance.last_updated_at = Utc::now();
        self.store.update(instance.clone(), expected).await?;
        Ok(())
    }
}
