//! Default incoming steps: retry, deserialize, dispatch

use crate::error::PipelineError;
use crate::handlers::HandlerActivator;
use crate::message::{self, headers, Message};
use crate::pipeline::{DispatchMode, IncomingStep, IncomingStepContext, Next};
use crate::transport::Transport;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default time failures of a message are remembered after its last failed delivery
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(600);

/// Retry policy of the retry step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Deliveries attempted before the message is considered failed
    pub max_delivery_attempts: u32,
    /// Dispatch `Failed<M>` instead of forwarding to the error queue
    pub second_level_retries: bool,
    /// Queue poison messages are forwarded to
    pub error_queue: String,
    /// Failures of a message that has not failed again for this long are forgotten
    pub failure_ttl: Duration,
}

impl RetryOptions {
    /// Defaults: 5 attempts, no second-level retries, queue "error",
    /// failures remembered for 10 minutes
    pub fn new() -> Self {
        RetryOptions {
            max_delivery_attempts: 5,
            second_level_retries: false,
            error_queue: "error".to_string(),
            failure_ttl: DEFAULT_FAILURE_TTL,
        }
    }

    /// Set the number of delivery attempts
    pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    /// Enable or disable second-level retries
    pub fn second_level_retries(mut self, enabled: bool) -> Self {
        self.second_level_retries = enabled;
        self
    }

    /// Set the error queue
    pub fn error_queue(mut self, queue: impl Into<String>) -> Self {
        self.error_queue = queue.into();
        self
    }

    /// Set how long failures are remembered after the last failed delivery
    pub fn failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Failures {
    attempts: u32,
    details: Vec<String>,
    last_failure: Instant,
}

impl Failures {
    fn new() -> Self {
        Failures {
            attempts: 0,
            details: Vec::new(),
            last_failure: Instant::now(),
        }
    }

    fn summary(&self) -> String {
        self.details.join("\n")
    }
}

/// Tracks failed deliveries and takes poison messages out of circulation
///
/// Failures are kept per message id until the message succeeds, is taken
/// out of circulation, or has not failed again within
/// [`RetryOptions::failure_ttl`]. Expired entries are dropped whenever a
/// new failure is recorded, so the map is bounded by the messages failing
/// within one ttl window.
pub struct RetryStep {
    options: RetryOptions,
    transport: Arc<dyn Transport>,
    failures: DashMap<String, Failures>,
}

impl RetryStep {
    /// Step name
    pub const NAME: &'static str = "retry";

    /// Create the step; poison messages are forwarded through `transport`
    pub fn new(options: RetryOptions, transport: Arc<dyn Transport>) -> Self {
        RetryStep {
            options,
            transport,
            failures: DashMap::new(),
        }
    }

    /// Failed deliveries recorded for a message id
    pub fn failed_attempts(&self, message_id: &str) -> u32 {
        self.failures.get(message_id).map(|f| f.attempts).unwrap_or(0)
    }

    /// Number of message ids with recorded failures
    pub fn tracked_messages(&self) -> usize {
        self.failures.len()
    }

    fn forget_expired(&self) {
        let ttl = self.options.failure_ttl;
        let before = self.failures.len();
        self.failures.retain(|_, f| f.last_failure.elapsed() < ttl);
        let expired = before.saturating_sub(self.failures.len());
        if expired > 0 {
            debug!(expired, "forgot failures of messages that did not come back");
        }
    }

    async fn forward_to_error_queue(
        &self,
        context: &IncomingStepContext,
        error_details: String,
    ) -> anyhow::Result<()> {
        let mut message = context.transport_message.clone();
        message
            .headers
            .insert(headers::ERROR_DETAILS.to_string(), error_details);
        if let Some(source) = self.transport.address() {
            message
                .headers
                .insert(headers::SOURCE_QUEUE.to_string(), source.to_string());
        }
        warn!(
            message_id = context.transport_message.message_id().unwrap_or("<none>"),
            error_queue = %self.options.error_queue,
            "moving message to error queue"
        );
        self.transport
            .send(&self.options.error_queue, message, &context.transaction_context)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IncomingStep for RetryStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, context: &mut IncomingStepContext, next: Next<'_>) -> anyhow::Result<()> {
        let Some(message_id) = context.transport_message.message_id().map(str::to_string) else {
            warn!("message has no id, failed deliveries cannot be tracked");
            return next.run(context).await;
        };

        let exhausted = self
            .failures
            .get(&message_id)
            .filter(|f| f.attempts >= self.options.max_delivery_attempts)
            .map(|f| f.summary());

        if let Some(error_details) = exhausted {
            self.failures.remove(&message_id);
            if !self.options.second_level_retries {
                return self.forward_to_error_queue(context, error_details).await;
            }

            debug!(message_id = %message_id, "dispatching as failed message");
            context.dispatch = DispatchMode::SecondLevel {
                error_details: error_details.clone(),
            };
            return match next.run(context).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let details = format!("{error_details}\nsecond-level dispatch: {e:#}");
                    self.forward_to_error_queue(context, details).await
                }
            };
        }

        match next.run(context).await {
            Ok(()) => {
                self.failures.remove(&message_id);
                Ok(())
            }
            Err(e) => {
                self.forget_expired();
                let attempt = {
                    let mut entry = self
                        .failures
                        .entry(message_id.clone())
                        .or_insert_with(Failures::new);
                    entry.attempts += 1;
                    entry.last_failure = Instant::now();
                    let attempt = entry.attempts;
                    entry.details.push(format!("attempt {attempt}: {e:#}"));
                    attempt
                };
                warn!(
                    message_id = %message_id,
                    attempt,
                    error = %e,
                    "message handling failed"
                );
                Err(e)
            }
        }
    }
}

/// Parses the transport message body
#[derive(Debug, Default)]
pub struct DeserializeStep;

impl DeserializeStep {
    /// Step name
    pub const NAME: &'static str = "deserialize";
}

#[async_trait]
impl IncomingStep for DeserializeStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, context: &mut IncomingStepContext, next: Next<'_>) -> anyhow::Result<()> {
        let transport_message = &context.transport_message;
        let message_type = transport_message.message_type().ok_or_else(|| {
            PipelineError::MissingType(transport_message.message_id().unwrap_or("<none>").to_string())
        })?;
        let body = message::deserialize(transport_message).map_err(PipelineError::Decode)?;
        context.message = Some(Message {
            headers: transport_message.headers.clone(),
            message_type: message_type.to_string(),
            body,
        });
        next.run(context).await
    }
}

/// Hands the message to its handlers
pub struct DispatchStep {
    activator: Arc<HandlerActivator>,
}

impl DispatchStep {
    /// Step name
    pub const NAME: &'static str = "dispatch";

    /// Dispatch to the handlers in `activator`
    pub fn new(activator: Arc<HandlerActivator>) -> Self {
        DispatchStep { activator }
    }
}

#[async_trait]
impl IncomingStep for DispatchStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, context: &mut IncomingStepContext, next: Next<'_>) -> anyhow::Result<()> {
        let message = context
            .message
            .as_ref()
            .ok_or(PipelineError::NotDeserialized(Self::NAME))?;
        self.activator.dispatch(message, &context.dispatch).await?;
        next.run(context).await
    }
}
