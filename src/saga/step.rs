use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;

/// A forward or compensating action of a saga step.
///
/// Actions read and update the saga state. The state is checkpointed after
/// each successful action; changes made by a failing action are discarded.
#[async_trait]
pub trait StepAction<S>: Send + Sync {
    async fn run(&self, state: &mut S, dispatcher: &dyn Dispatcher) -> Result<(), DispatchError>;
}

type BuildFn<S> = Box<dyn Fn(&S) -> Result<Vec<u8>, DispatchError> + Send + Sync>;
type ApplyFn<S> = Box<dyn Fn(&mut S, Vec<u8>) -> Result<(), DispatchError> + Send + Sync>;

/// Builds a command from the state, dispatches it and optionally folds the
/// response back into the state.
pub struct DispatchStep<S> {
    type_tag: String,
    build: BuildFn<S>,
    apply: Option<ApplyFn<S>>,
}

impl<S: 'static> DispatchStep<S> {
    /// Dispatch a raw payload built from the state.
    pub fn new<F>(type_tag: impl Into<String>, build: F) -> Self
    where
        F: Fn(&S) -> Result<Vec<u8>, DispatchError> + Send + Sync + 'static,
    {
        Self {
            type_tag: type_tag.into(),
            build: Box::new(build),
            apply: None,
        }
    }

    /// Dispatch a typed command, bitcode-encoded.
    pub fn command<C, F>(type_tag: impl Into<String>, build: F) -> Self
    where
        C: Serialize + 'static,
        F: Fn(&S) -> C + Send + Sync + 'static,
    {
        Self::new(type_tag, move |state: &S| codec::encode(&build(state)))
    }

    /// Decode the command's response and apply it to the state.
    pub fn on_response<R, F>(mut self, apply: F) -> Self
    where
        R: DeserializeOwned + 'static,
        F: Fn(&mut S, R) + Send + Sync + 'static,
    {
        self.apply = Some(Box::new(move |state: &mut S, bytes: Vec<u8>| {
            let response: R = codec::decode(&bytes)?;
            apply(state, response);
            Ok(())
        }));
        self
    }
}

#[async_trait]
impl<S: Send> StepAction<S> for DispatchStep<S> {
    async fn run(&self, state: &mut S, dispatcher: &dyn Dispatcher) -> Result<(), DispatchError> {
        let payload = (self.build)(state)?;
        let response = dispatcher.dispatch(&self.type_tag, &payload).await?;
        if let Some(apply) = &self.apply {
            apply(state, response)?;
        }
        Ok(())
    }
}

/// A local action on the state that needs no dispatch.
pub struct FnStep<S> {
    f: Box<dyn Fn(&mut S) -> Result<(), DispatchError> + Send + Sync>,
}

impl<S: 'static> FnStep<S> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut S) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl<S: Send> StepAction<S> for FnStep<S> {
    async fn run(&self, state: &mut S, _dispatcher: &dyn Dispatcher) -> Result<(), DispatchError> {
        (self.f)(state)
    }
}

/// One step of a saga: a forward action and an optional compensation.
pub struct SagaStep<S> {
    name: String,
    forward: Box<dyn StepAction<S>>,
    compensation: Option<Box<dyn StepAction<S>>>,
}

impl<S: Send + 'static> SagaStep<S> {
    pub fn new(name: impl Into<String>, forward: impl StepAction<S> + 'static) -> Self {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            compensation: None,
        }
    }

    pub fn with_compensation(mut self, compensation: impl StepAction<S> + 'static) -> Self {
        self.compensation = Some(Box::new(compensation));
        self
    }
}

impl<S> SagaStep<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }

    pub(crate) fn forward(&self) -> &dyn StepAction<S> {
        self.forward.as_ref()
    }

    pub(crate) fn compensation(&self) -> Option<&dyn StepAction<S>> {
        self.compensation.as_deref()
    }
}

/// Ordered list of steps making up a saga type.
pub struct SagaDefinition<S> {
    saga_type: String,
    steps: Vec<SagaStep<S>>,
}

impl<S> SagaDefinition<S> {
    pub fn new(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: SagaStep<S>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn steps(&self) -> &[SagaStep<S>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
