//! Backend abstraction for the chat service

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    stream::StreamEventStream,
    types::{ChatRequest, Conversation, ConversationSummary, LocalFile, UploadReceipt},
};

/// The REST surface the chat client talks to.
///
/// [`HttpBackend`](crate::HttpBackend) is the real implementation; tests and
/// embedders can substitute their own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// List conversations, most recently updated first
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Fetch a conversation by id, or create a new one when `id` is `None`
    async fn get_conversation(&self, id: Option<&str>) -> Result<Conversation>;

    /// Delete a conversation
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Pin or unpin a conversation, returning the stored pin state
    async fn pin_conversation(&self, id: &str, pinned: bool) -> Result<bool>;

    /// Upload a file ahead of the message that references it
    async fn upload(&self, file: &LocalFile) -> Result<UploadReceipt>;

    /// Open the streaming chat endpoint.
    ///
    /// An error here means the request never produced a body. Once a stream
    /// is returned, every later failure arrives as a `Fail` event.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream>;

    /// Non-streaming send; returns the updated conversation
    async fn send_message(
        &self,
        request: &ChatRequest,
        file: Option<&LocalFile>,
    ) -> Result<Conversation>;
}
