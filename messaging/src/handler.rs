use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::RequestContext;
use crate::message::Message;

/// Application code that consumes messages of one type.
///
/// Handlers hold no queue state; the partition processor decides when and how often they run.
/// Returning an error hands the failure to the processor's failure disposition.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: &Message, context: &RequestContext) -> Result<()>;
}

#[async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    async fn on_message(&self, message: &Message, context: &RequestContext) -> Result<()> {
        self.as_ref().on_message(message, context).await
    }
}
