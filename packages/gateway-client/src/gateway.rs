//! The gateway seam consumed by the polling engine

use std::future::Future;
use std::sync::Arc;

use crate::error::GatewayResult;
use crate::models::{Conversation, ConversationId, Message};

/// Read access to conversations and messages on the backend
///
/// Implemented by [`HttpMessageGateway`](crate::HttpMessageGateway) for
/// production and by in-memory doubles in tests.
pub trait MessageGateway: Send + Sync + 'static {
    /// Fetch one page of a conversation's messages, newest first
    fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = GatewayResult<Vec<Message>>> + Send;

    /// Fetch the current user's conversation list
    fn list_conversations(&self) -> impl Future<Output = GatewayResult<Vec<Conversation>>> + Send;
}

impl<G: MessageGateway> MessageGateway for Arc<G> {
    fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = GatewayResult<Vec<Message>>> + Send {
        (**self).list_messages(conversation_id, page, per_page)
    }

    fn list_conversations(&self) -> impl Future<Output = GatewayResult<Vec<Conversation>>> + Send {
        (**self).list_conversations()
    }
}
