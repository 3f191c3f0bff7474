//! Channel abstraction for message I/O.
//!
//! Ingestion and delivery are separate seams: a `SourceChannel` produces the
//! stream of observed source posts, a `Delivery` sends one text to one
//! target channel.

pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::cache::snapshot::ChannelId;
use crate::error::ChannelError;
use crate::pipeline::types::SourceMessage;

pub use telegram::{TelegramDelivery, TelegramListener};

/// Stream of observed source messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = SourceMessage> + Send>>;

/// A producer of source messages.
#[async_trait]
pub trait SourceChannel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Start listening. The stream ends when the channel stops.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Check the channel can reach its backend.
    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Sends outbound text to a target channel.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, target_id: ChannelId, text: &str) -> Result<(), ChannelError>;
}
