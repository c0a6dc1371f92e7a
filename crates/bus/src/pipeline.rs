//! Incoming message pipeline
//!
//! Every received message flows through an ordered list of steps. Each step
//! decides whether (and when) the rest of the pipeline runs by awaiting the
//! [`Next`] it is handed:
//!
//! ```text
//! retry ──► deserialize ──► dispatch
//!   │            │             │
//!   └── next ────┴── next ─────┘
//! ```
//!
//! Steps are positioned relative to each other by name, see
//! [`PipelineStepInjector`].

use crate::error::PipelineError;
use crate::message::{Message, TransportMessage};
use ambientbus_core::TransactionContext;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// How the dispatch step should deliver the message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Deliver to the ordinary handlers
    #[default]
    Normal,
    /// Deliver as `Failed<M>` after too many failed deliveries
    SecondLevel {
        /// Error details of the failed deliveries
        error_details: String,
    },
}

/// State shared by the steps processing one message
pub struct IncomingStepContext {
    /// Message as received
    pub transport_message: TransportMessage,
    /// Unit of work the message is processed in
    pub transaction_context: TransactionContext,
    /// Parsed message, set by the deserialize step
    pub message: Option<Message>,
    /// Set by the retry step
    pub dispatch: DispatchMode,
}

impl IncomingStepContext {
    /// Context for a freshly received message
    pub fn new(transport_message: TransportMessage, transaction_context: TransactionContext) -> Self {
        IncomingStepContext {
            transport_message,
            transaction_context,
            message: None,
            dispatch: DispatchMode::Normal,
        }
    }
}

/// One step of the incoming pipeline
#[async_trait]
pub trait IncomingStep: Send + Sync {
    /// Name other steps can be positioned relative to
    fn name(&self) -> &str;

    /// Process the message, running the rest of the pipeline through `next`
    async fn process(&self, context: &mut IncomingStepContext, next: Next<'_>)
        -> anyhow::Result<()>;
}

/// Remainder of the pipeline after the current step
pub struct Next<'a> {
    steps: &'a [Arc<dyn IncomingStep>],
}

impl<'a> Next<'a> {
    /// Run the remaining steps
    pub async fn run(self, context: &mut IncomingStepContext) -> anyhow::Result<()> {
        match self.steps.split_first() {
            Some((step, rest)) => step.process(context, Next { steps: rest }).await,
            None => Ok(()),
        }
    }
}

/// Ordered list of incoming steps
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn IncomingStep>>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn with_step(mut self, step: Arc<dyn IncomingStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Arc<dyn IncomingStep>] {
        &self.steps
    }

    /// Step names in execution order
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every step for one message
    pub async fn invoke(&self, context: &mut IncomingStepContext) -> anyhow::Result<()> {
        Next { steps: &self.steps }.run(context).await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|s| s.name())).finish()
    }
}

/// Where an injected step goes relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Immediately before the anchor
    Before,
    /// Immediately after the anchor
    After,
}

/// Inserts steps into an existing pipeline relative to named steps
///
/// ```ignore
/// let pipeline = PipelineStepInjector::new(pipeline)
///     .on_receive(Arc::new(MyStep), Position::After, "deserialize")
///     .build()?;
/// ```
pub struct PipelineStepInjector {
    pipeline: Pipeline,
    injections: Vec<(Arc<dyn IncomingStep>, Position, String)>,
}

impl PipelineStepInjector {
    /// Start from `pipeline`
    pub fn new(pipeline: Pipeline) -> Self {
        PipelineStepInjector {
            pipeline,
            injections: Vec::new(),
        }
    }

    /// Queue an incoming step for injection
    pub fn on_receive(
        mut self,
        step: Arc<dyn IncomingStep>,
        position: Position,
        anchor: impl Into<String>,
    ) -> Self {
        self.injections.push((step, position, anchor.into()));
        self
    }

    /// Apply the injections in the order they were queued
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let mut steps = self.pipeline.steps;
        for (step, position, anchor) in self.injections {
            let index = steps
                .iter()
                .position(|s| s.name() == anchor)
                .ok_or_else(|| PipelineError::UnknownAnchor {
                    step: step.name().to_string(),
                    anchor: anchor.clone(),
                })?;
            let at = match position {
                Position::Before => index,
                Position::After => index + 1,
            };
            steps.insert(at, step);
        }
        Ok(Pipeline { steps })
    }
}
