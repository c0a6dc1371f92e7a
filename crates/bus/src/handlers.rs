//! Typed message handlers

use crate::error::PipelineError;
use crate::message::{type_name_of, Failed, Message};
use crate::pipeline::DispatchMode;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Handler = Arc<dyn Fn(&Message, &DispatchMode) -> anyhow::Result<HandlerFuture> + Send + Sync>;

fn failed_key(message_type: &str) -> String {
    format!("failed:{message_type}")
}

/// Registry of handlers, keyed by message type
///
/// Handlers can be added while the bus is running.
#[derive(Default)]
pub struct HandlerActivator {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl HandlerActivator {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle messages of type `M`
    pub fn handle<M, F, Fut>(&self, handler: F) -> &Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |message: &Message, _: &DispatchMode| {
            let decoded: M = message.decode()?;
            Ok(Box::pin(handler(decoded)) as HandlerFuture)
        });
        self.register(type_name_of::<M>().to_string(), handler)
    }

    /// Handle messages of type `M` that failed too many times
    ///
    /// Only used when second-level retries are enabled.
    pub fn handle_failed<M, F, Fut>(&self, handler: F) -> &Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(Failed<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |message: &Message, mode: &DispatchMode| {
            let error_details = match mode {
                DispatchMode::SecondLevel { error_details } => error_details.clone(),
                DispatchMode::Normal => String::new(),
            };
            let failed = Failed {
                message: message.decode::<M>()?,
                error_details,
                headers: message.headers.clone(),
            };
            Ok(Box::pin(handler(failed)) as HandlerFuture)
        });
        self.register(failed_key(type_name_of::<M>()), handler)
    }

    fn register(&self, key: String, handler: Handler) -> &Self {
        self.handlers.write().entry(key).or_default().push(handler);
        self
    }

    /// Whether any handler would receive `message` in `mode`
    pub fn has_handlers(&self, message_type: &str, mode: &DispatchMode) -> bool {
        let key = Self::key(message_type, mode);
        self.handlers.read().get(&key).is_some_and(|h| !h.is_empty())
    }

    fn key(message_type: &str, mode: &DispatchMode) -> String {
        match mode {
            DispatchMode::Normal => message_type.to_string(),
            DispatchMode::SecondLevel { .. } => failed_key(message_type),
        }
    }

    /// Run every matching handler in registration order
    pub async fn dispatch(&self, message: &Message, mode: &DispatchMode) -> anyhow::Result<()> {
        let key = Self::key(&message.message_type, mode);
        let handlers = self.handlers.read().get(&key).cloned().unwrap_or_default();
        if handlers.is_empty() {
            return Err(PipelineError::NoHandlers(key).into());
        }
        for handler in handlers {
            handler(message, mode)?.await?;
        }
        Ok(())
    }
}
