//! The bus: configuration, sending and the receive loop
//!
//! ## Worker Loop
//!
//! ```text
//! loop {
//!     ctx = TransactionContext::new()
//!     msg = transport.receive(ctx)           // decorators run here
//!     with_context(ctx, pipeline.invoke())   // retry → deserialize → … → dispatch
//!     Ok  → ctx.complete()                   // commit hooks: sends, acks
//!     Err → ctx.abort()
//!     ctx.dispose()                          // dispose hooks: requeue, scope votes
//! }
//! ```

use crate::error::{BusError, PipelineError, TransportError};
use crate::handlers::HandlerActivator;
use crate::message::{serialize, Headers, TransportMessage};
use crate::pipeline::{IncomingStepContext, Pipeline};
use crate::steps::{DeserializeStep, DispatchStep, RetryOptions, RetryStep};
use crate::transport::{CancellationSignal, CancellationSource, Transport};
use ambientbus_core::{execution, TransactionContext};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before polling an empty queue again
const IDLE_DELAY: Duration = Duration::from_millis(10);

type TransportDecorator = Box<dyn FnOnce(Arc<dyn Transport>) -> Arc<dyn Transport> + Send>;
type PipelineDecorator = Box<dyn FnOnce(Pipeline) -> Result<Pipeline, PipelineError> + Send>;

/// Options applied when the bus starts
///
/// Extension traits add higher-level configuration on top of the
/// decoration hooks.
pub struct OptionsConfigurer {
    transport_decorators: Vec<TransportDecorator>,
    pipeline_decorators: Vec<PipelineDecorator>,
    retry: RetryOptions,
    workers: usize,
    log_pipeline: bool,
}

impl OptionsConfigurer {
    fn new() -> Self {
        OptionsConfigurer {
            transport_decorators: Vec::new(),
            pipeline_decorators: Vec::new(),
            retry: RetryOptions::default(),
            workers: 1,
            log_pipeline: false,
        }
    }

    /// Wrap the transport; decorators apply in registration order
    pub fn decorate_transport<F>(&mut self, decorate: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + 'static,
    {
        self.transport_decorators.push(Box::new(decorate));
        self
    }

    /// Rework the incoming pipeline; decorators apply in registration order
    pub fn decorate_pipeline<F>(&mut self, decorate: F) -> &mut Self
    where
        F: FnOnce(Pipeline) -> Result<Pipeline, PipelineError> + Send + 'static,
    {
        self.pipeline_decorators.push(Box::new(decorate));
        self
    }

    /// Set the retry policy
    pub fn retry_strategy(&mut self, options: RetryOptions) -> &mut Self {
        self.retry = options;
        self
    }

    /// Number of concurrent workers, at least one
    pub fn number_of_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = workers.max(1);
        self
    }

    /// Log the assembled incoming pipeline at startup
    pub fn log_pipeline(&mut self, enabled: bool) -> &mut Self {
        self.log_pipeline = enabled;
        self
    }
}

/// Builder for a [`Bus`]
///
/// # Example
///
/// ```ignore
/// let activator = Arc::new(HandlerActivator::new());
/// let bus = BusBuilder::new(activator.clone())
///     .transport(InMemTransport::new(network, "input"))
///     .options(|o| {
///         o.retry_strategy(RetryOptions::new().second_level_retries(true));
///     })
///     .start()
///     .await?;
/// ```
pub struct BusBuilder {
    activator: Arc<HandlerActivator>,
    transport: Option<Arc<dyn Transport>>,
    options: OptionsConfigurer,
}

impl BusBuilder {
    /// Bus dispatching to the handlers in `activator`
    pub fn new(activator: Arc<HandlerActivator>) -> Self {
        BusBuilder {
            activator,
            transport: None,
            options: OptionsConfigurer::new(),
        }
    }

    /// Set the transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Adjust options; may be called several times
    pub fn options<F: FnOnce(&mut OptionsConfigurer)>(mut self, configure: F) -> Self {
        configure(&mut self.options);
        self
    }

    /// Assemble the bus and start its workers
    ///
    /// A send-only transport starts no workers.
    pub async fn start(self) -> Result<Bus, BusError> {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let BusBuilder {
            activator,
            transport,
            options,
        } = self;

        let mut transport = transport.ok_or(BusError::NoTransport)?;
        for decorate in options.transport_decorators {
            transport = decorate(transport);
        }

        let retry = RetryStep::new(options.retry.clone(), transport.clone());
        let mut pipeline = Pipeline::new()
            .with_step(Arc::new(retry))
            .with_step(Arc::new(DeserializeStep))
            .with_step(Arc::new(DispatchStep::new(activator)));
        for decorate in options.pipeline_decorators {
            pipeline = decorate(pipeline)?;
        }
        if options.log_pipeline {
            info!(steps = ?pipeline.step_names(), "incoming pipeline");
        }
        let pipeline = Arc::new(pipeline);

        let shutdown = CancellationSource::new();
        let mut workers = Vec::new();
        if let Some(address) = transport.address() {
            transport.create_queue(&options.retry.error_queue).await?;
            for id in 0..options.workers {
                let worker = Worker {
                    id,
                    transport: transport.clone(),
                    pipeline: pipeline.clone(),
                    cancellation: shutdown.signal(),
                };
                workers.push(runtime.spawn(worker.run()));
            }
            debug!(address, workers = workers.len(), "bus started");
        } else {
            debug!("send-only bus started");
        }

        Ok(Bus {
            inner: Arc::new(BusInner {
                transport,
                shutdown,
                workers: Mutex::new(workers),
            }),
        })
    }
}

struct BusInner {
    transport: Arc<dyn Transport>,
    shutdown: CancellationSource,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to a running bus
///
/// Cheap to clone. Workers stop when [`shutdown`](Bus::shutdown) is called
/// or the last handle is dropped.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Input queue, None for a send-only bus
    pub fn address(&self) -> Option<&str> {
        self.inner.transport.address()
    }

    /// Transport after decoration
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Send `message` to this bus's own input queue
    pub async fn send_local<M: Serialize>(&self, message: &M) -> Result<(), BusError> {
        let address = self.address().ok_or(BusError::SendOnly)?.to_string();
        self.send(&address, message).await
    }

    /// Send `message` to `destination`
    ///
    /// Inside a handler, or after a bus transaction was enlisted in an
    /// ambient scope, the message leaves with that transaction context.
    /// Otherwise it is sent in a context of its own that commits
    /// immediately.
    pub async fn send<M: Serialize>(&self, destination: &str, message: &M) -> Result<(), BusError> {
        let message = serialize(message, Headers::new())?;
        if let Some(context) = execution::current_context() {
            return self.send_within(destination, message, &context).await;
        }

        let context = TransactionContext::new();
        let result = match self.send_within(destination, message, &context).await {
            Ok(()) => context.complete().await.map_err(BusError::from),
            Err(e) => Err(e),
        };
        context.dispose();
        result
    }

    async fn send_within(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<(), BusError> {
        debug!(
            destination,
            message_id = message.message_id().unwrap_or("<none>"),
            context_id = %context.id(),
            "sending message"
        );
        self.inner.transport.send(destination, message, context).await?;
        Ok(())
    }

    /// Stop the workers and wait for them to finish their current message
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "bus worker panicked");
            }
        }
        debug!("bus stopped");
    }
}

struct Worker {
    id: usize,
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    cancellation: CancellationSignal,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "worker started");
        while !self.cancellation.is_cancelled() {
            if !self.receive_next().await {
                tokio::select! {
                    _ = self.cancellation.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    /// Returns whether a message was received
    async fn receive_next(&self) -> bool {
        let context = TransactionContext::new();
        let received = match self.transport.receive(&context, &self.cancellation).await {
            Ok(Some(message)) => {
                self.handle(message, &context).await;
                true
            }
            Ok(None) | Err(TransportError::Cancelled) => false,
            Err(e) => {
                warn!(worker = self.id, error = %e, "receive failed");
                false
            }
        };
        context.dispose();
        received
    }

    async fn handle(&self, message: TransportMessage, context: &TransactionContext) {
        let message_id = message.message_id().unwrap_or("<none>").to_string();
        let mut step_context = IncomingStepContext::new(message, context.clone());
        let result =
            execution::with_context(context.clone(), self.pipeline.invoke(&mut step_context)).await;

        match result {
            Ok(()) => {
                if let Err(e) = context.complete().await {
                    error!(
                        worker = self.id,
                        message_id = %message_id,
                        error = %e,
                        "could not complete transaction context"
                    );
                }
            }
            Err(e) => {
                debug!(
                    worker = self.id,
                    message_id = %message_id,
                    error = %format!("{e:#}"),
                    "message handling failed, rolling back"
                );
                context.abort();
            }
        }
    }
}
