//! Decorators wrapping a [`MessageHandler`], composed when the type dictionary is populated:
//!
//! ```ignore
//! dictionary.register::<OrderPlaced, _>(
//!     OrderHandler::new(store)
//!         .map_errors(to_rpc_error)
//!         .logged("order_placed"),
//! );
//! ```
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use crate::context::RequestContext;
use crate::error::{ErrorCategory, RpcError};
use crate::handler::MessageHandler;
use crate::message::Message;

/// Logs every invocation of the inner handler. Failures are logged at a level that follows
/// their [`ErrorCategory`] and returned unchanged.
pub struct Logged<H> {
    inner: H,
    name: &'static str,
}

impl<H> Logged<H> {
    pub fn new(inner: H, name: &'static str) -> Self {
        Self { inner, name }
    }
}

fn category_of(failure: &anyhow::Error) -> Option<ErrorCategory> {
    failure
        .chain()
        .find_map(|cause| cause.downcast_ref::<RpcError>())
        .map(|rpc_error| rpc_error.category)
}

#[async_trait]
impl<H> MessageHandler for Logged<H>
where
    H: MessageHandler,
{
    async fn on_message(&self, message: &Message, context: &RequestContext) -> Result<()> {
        let metadata = message.metadata();
        trace!(
            handler = self.name,
            message_id = metadata.message_id(),
            correlation_id = context.correlation_id(),
            "Handling message"
        );

        let started = Instant::now();
        let result = self.inner.on_message(message, context).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = &result {
            match category_of(e) {
                Some(ErrorCategory::ResourceNotFound) => info!(
                    handler = self.name,
                    message_id = metadata.message_id(),
                    elapsed_ms,
                    error = ?e,
                    "Handler failed"
                ),
                Some(ErrorCategory::BadRequest) | Some(ErrorCategory::BackendError) => warn!(
                    handler = self.name,
                    message_id = metadata.message_id(),
                    elapsed_ms,
                    error = ?e,
                    "Handler failed"
                ),
                _ => error!(
                    handler = self.name,
                    message_id = metadata.message_id(),
                    elapsed_ms,
                    error = ?e,
                    "Handler failed"
                ),
            }
        } else {
            debug!(
                handler = self.name,
                message_id = metadata.message_id(),
                elapsed_ms,
                "Handled message"
            );
        }

        result
    }
}

/// Translates handler failures into [`RpcError`]s. Failures the mapping returns `None` for are
/// swallowed: the invocation counts as successful and the message is consumed.
pub struct MapErrors<H, F> {
    inner: H,
    mapping: F,
}

impl<H, F> MapErrors<H, F> {
    pub fn new(inner: H, mapping: F) -> Self {
        Self { inner, mapping }
    }
}

#[async_trait]
impl<H, F> MessageHandler for MapErrors<H, F>
where
    H: MessageHandler,
    F: Fn(&anyhow::Error) -> Option<RpcError> + Send + Sync,
{
    async fn on_message(&self, message: &Message, context: &RequestContext) -> Result<()> {
        match self.inner.on_message(message, context).await {
            Ok(()) => Ok(()),
            Err(e) => match (self.mapping)(&e) {
                Some(rpc_error) => Err(rpc_error.into()),
                None => {
                    debug!(
                        message_id = message.metadata().message_id(),
                        error = ?e,
                        "Swallowing unmapped handler failure"
                    );
                    Ok(())
                }
            },
        }
    }
}

pub trait HandlerExt: MessageHandler + Sized {
    fn logged(self, name: &'static str) -> Logged<Self> {
        Logged::new(self, name)
    }

    fn map_errors<F>(self, mapping: F) -> MapErrors<Self, F>
    where
        F: Fn(&anyhow::Error) -> Option<RpcError> + Send + Sync,
    {
        MapErrors::new(self, mapping)
    }
}

impl<H: MessageHandler> HandlerExt for H {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Lookup {
        #[prost(string, tag = "1")]
        id: String,
    }

    impl prost::Name for Lookup {
        const NAME: &'static str = "Lookup";
        const PACKAGE: &'static str = "messaging.test";
    }

    struct FailingHandler {
        calls: AtomicUsize,
        failure: fn() -> anyhow::Error,
    }

    impl FailingHandler {
        fn new(failure: fn() -> anyhow::Error) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn on_message(&self, _message: &Message, _context: &RequestContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.failure)())
        }
    }

    fn lookup() -> Message {
        Message::one_way(
            Topic::default_service_inbox("com.example.catalog"),
            "sku-1",
            Lookup {
                id: "sku-1".to_string(),
            },
            &RequestContext::new(),
        )
    }

    fn not_found(e: &anyhow::Error) -> Option<RpcError> {
        if e.to_string().contains("missing") {
            Some(RpcError::new(
                ErrorCategory::ResourceNotFound,
                "NOT_FOUND",
                e.to_string(),
            ))
        } else {
            None
        }
    }

    #[tokio::test]
    async fn test_logged_passes_failure_through_unchanged() {
        let handler = FailingHandler::new(|| {
            RpcError::new(ErrorCategory::BadRequest, "INVALID", "bad sku").into()
        })
        .logged("lookup");

        let result = handler.on_message(&lookup(), &RequestContext::new()).await;

        let failure = result.unwrap_err();
        assert_eq!(
            failure.downcast_ref::<RpcError>().map(|e| e.category),
            Some(ErrorCategory::BadRequest)
        );
        assert_eq!(handler.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_errors_translates_covered_failures() {
        let handler = FailingHandler::new(|| anyhow!("sku missing")).map_errors(not_found);

        let failure = handler
            .on_message(&lookup(), &RequestContext::new())
            .await
            .unwrap_err();

        let rpc_error = failure.downcast_ref::<RpcError>().unwrap();
        assert_eq!(rpc_error.category, ErrorCategory::ResourceNotFound);
        assert_eq!(rpc_error.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_map_errors_swallows_uncovered_failures() {
        let handler = FailingHandler::new(|| anyhow!("disk on fire")).map_errors(not_found);

        let result = handler.on_message(&lookup(), &RequestContext::new()).await;

        assert!(result.is_ok());
        assert_eq!(handler.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_category_found_behind_context() {
        let failure = anyhow::Error::new(RpcError::new(
            ErrorCategory::Conflict,
            "VERSION",
            "stale write",
        ))
        .context("updating stock");

        assert_eq!(category_of(&failure), Some(ErrorCategory::Conflict));
        assert_eq!(category_of(&anyhow!("plain")), None);
    }
}
