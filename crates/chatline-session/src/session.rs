//! Chat session: ties the transcript to a backend and drives sends.

use std::sync::Arc;
use std::time::Duration;

use chatline_client::{
    ChatBackend, ChatRequest, ConversationSummary, LocalFile, Message, MessageState, Sender,
    StreamEvent, stream::TRUNCATED_STREAM_MESSAGE,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::SessionEvent;
use crate::handle::SessionHandle;
use crate::transcript::{Applied, RESPONSE_ERROR_TEXT, StreamTicket, Transcript};

/// Reason recorded when a send is aborted by the user
pub const CANCELLED_REASON: &str = "Cancelled";

/// Reason recorded when a non-streaming send comes back without a reply
pub const NO_REPLY_REASON: &str = "Response contained no reply";

/// How a send ended
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The assistant reply completed
    Completed { message: Message },
    /// The assistant reply failed; `message` holds what was shown
    Failed { message: Message, reason: String },
    /// The conversation changed before the reply finished
    Discarded,
}

/// A chat session over one backend.
///
/// Cloning is cheap and every clone shares the same transcript.
#[derive(Clone)]
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    transcript: Arc<Mutex<Transcript>>,
    conversations: Arc<Mutex<Vec<ConversationSummary>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl ChatSession {
    /// Create a session with no conversation open
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            backend,
            transcript: Arc::new(Mutex::new(Transcript::new())),
            conversations: Arc::new(Mutex::new(Vec::new())),
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get a handle for aborting sends and waiting for idle
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Id of the open conversation
    pub fn conversation_id(&self) -> Option<String> {
        self.transcript.lock().conversation_id().map(str::to_string)
    }

    /// Snapshot of the open conversation's messages
    pub fn messages(&self) -> Vec<Message> {
        self.transcript.lock().messages().to_vec()
    }

    /// Whether a send is outstanding
    pub fn is_sending(&self) -> bool {
        self.transcript.lock().is_sending()
    }

    /// Last fetched conversation list
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations.lock().clone()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Open a conversation by id, or a new one when `id` is `None`.
    ///
    /// An outstanding send is aborted and its late events are dropped.
    pub async fn open(&self, id: Option<&str>) -> Result<String> {
        let conversation = match self.backend.get_conversation(id).await {
            Ok(c) => c,
            Err(e) => {
                self.emit(SessionEvent::Error {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let conversation_id = conversation.id.clone();
        let message_count = conversation.messages.len();
        self.transcript.lock().load(conversation);
        self.handle.abort();
        tracing::debug!(
            "Loaded conversation {} with {} messages",
            conversation_id,
            message_count
        );

        self.emit(SessionEvent::ConversationLoaded {
            conversation_id: conversation_id.clone(),
            message_count,
        });
        self.refresh_in_background();
        Ok(conversation_id)
    }

    /// Start a fresh conversation
    pub async fn new_conversation(&self) -> Result<String> {
        self.open(None).await
    }

    /// Delete a conversation, closing it if it is open
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.backend.delete_conversation(id).await?;

        let was_open = {
            let mut transcript = self.transcript.lock();
            let open = transcript.conversation_id() == Some(id);
            if open {
                transcript.clear();
            }
            open
        };
        if was_open {
            self.handle.abort();
            self.emit(SessionEvent::ConversationCleared);
        }

        self.conversations.lock().retain(|c| c.id != id);
        self.refresh_in_background();
        Ok(())
    }

    /// Pin or unpin a conversation, returning the stored state
    pub async fn set_pinned(&self, id: &str, pinned: bool) -> Result<bool> {
        let stored = self.backend.pin_conversation(id, pinned).await?;
        if let Some(summary) = self.conversations.lock().iter_mut().find(|c| c.id == id) {
            summary.pinned = stored;
        }
        Ok(stored)
    }

    /// Fetch the conversation list.
    ///
    /// On failure the previous list is kept and the transcript is untouched.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self.backend.list_conversations().await?;
        *self.conversations.lock() = conversations.clone();
        self.emit(SessionEvent::ConversationsRefreshed {
            conversations: conversations.clone(),
        });
        Ok(conversations)
    }

    fn refresh_in_background(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.refresh_conversations().await {
                tracing::warn!("Failed to refresh conversation list: {}", e);
            }
        });
    }

    /// Refresh the conversation list every `interval` until shutdown
    pub fn spawn_refresher(&self, interval: Duration) -> JoinHandle<()> {
        let session = self.clone();
        let shutdown = self.handle.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = session.refresh_conversations().await {
                            tracing::warn!("Periodic refresh failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Conversation refresher stopped");
        })
    }

    /// Send a message and stream the reply into the transcript.
    ///
    /// Rejections (blank input, a send already outstanding, no conversation)
    /// return an error and change nothing. Every accepted send ends with the
    /// placeholder completed or failed, or with the send discarded because
    /// the conversation changed underneath it.
    pub async fn submit(&self, text: &str, file: Option<LocalFile>) -> Result<SubmitOutcome> {
        let (ticket, mut request) = self.begin(text, file.as_ref())?;
        let (stream_id, cancel) = self.handle.begin_stream();

        if let Some(file) = &file {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = self.upload_attachment(&ticket, file, &mut request) => {}
            }
        }

        let outcome = self.stream_reply(&ticket, &request, cancel).await;
        self.handle.end_stream(stream_id);
        self.refresh_in_background();
        Ok(outcome)
    }

    /// Send a message without streaming and adopt the server's transcript.
    pub async fn send(&self, text: &str, file: Option<LocalFile>) -> Result<SubmitOutcome> {
        let (ticket, request) = self.begin(text, file.as_ref())?;
        let (stream_id, cancel) = self.handle.begin_stream();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.backend.send_message(&request, file.as_ref()) => Some(result),
        };

        let outcome = match result {
            None => self.fail(&ticket, CANCELLED_REASON),
            Some(Err(e)) => self.fail(&ticket, &e.to_string()),
            Some(Ok(conversation)) => {
                let conversation_id = conversation.id.clone();
                let applied = self.transcript.lock().reconcile(&ticket, conversation);
                match applied {
                    Applied::Discarded => SubmitOutcome::Discarded,
                    _ => {
                        let (message_count, reply) = {
                            let transcript = self.transcript.lock();
                            let reply = transcript
                                .messages()
                                .iter()
                                .rev()
                                .find(|m| m.sender == Sender::Assistant)
                                .cloned();
                            (transcript.messages().len(), reply)
                        };
                        self.emit(SessionEvent::Reconciled {
                            conversation_id,
                            message_count,
                        });
                        match reply {
                            Some(message) => SubmitOutcome::Completed { message },
                            None => SubmitOutcome::Failed {
                                message: Message {
                                    text: RESPONSE_ERROR_TEXT.to_string(),
                                    state: MessageState::Failed,
                                    error: Some(RESPONSE_ERROR_TEXT.to_string()),
                                    ..Message::assistant_placeholder()
                                },
                                reason: NO_REPLY_REASON.to_string(),
                            },
                        }
                    }
                }
            }
        };

        self.handle.end_stream(stream_id);
        self.refresh_in_background();
        Ok(outcome)
    }

    fn begin(&self, text: &str, file: Option<&LocalFile>) -> Result<(StreamTicket, ChatRequest)> {
        let attachment = file.map(LocalFile::to_attachment);
        let (ticket, conversation_id, user_message, placeholder) = {
            let mut transcript = self.transcript.lock();
            let ticket = transcript.begin_submit(text, attachment.clone())?;
            let conversation_id = transcript
                .conversation_id()
                .map(str::to_string)
                .unwrap_or_default();
            let user_message = transcript.message(&ticket.user_message_id).cloned();
            let placeholder = transcript.message(&ticket.placeholder_id).cloned();
            (ticket, conversation_id, user_message, placeholder)
        };

        if let (Some(user_message), Some(placeholder)) = (user_message, placeholder) {
            self.emit(SessionEvent::SubmitStarted {
                user_message,
                placeholder,
            });
        }

        let request = ChatRequest {
            message: text.to_string(),
            conversation_id,
            file: attachment,
        };
        Ok((ticket, request))
    }

    /// Upload ahead of the stream. A failed upload degrades to sending the
    /// message without a stored file.
    async fn upload_attachment(&self, ticket: &StreamTicket, file: &LocalFile, request: &mut ChatRequest) {
        match self.backend.upload(file).await {
            Ok(receipt) => {
                let recorded = self
                    .transcript
                    .lock()
                    .set_attachment_path(ticket, &receipt.filename);
                if recorded {
                    self.emit(SessionEvent::AttachmentUploaded {
                        message_id: ticket.user_message_id.clone(),
                        server_path: receipt.filename.clone(),
                    });
                }
                if let Some(attachment) = request.file.as_mut() {
                    attachment.server_path = Some(receipt.filename);
                }
            }
            Err(e) => {
                tracing::warn!("Upload of {} failed: {}", file.name, e);
            }
        }
    }

    async fn stream_reply(
        &self,
        ticket: &StreamTicket,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> SubmitOutcome {
        // Nothing is dispatched for a send that was aborted or switched away from
        let still_current = self.transcript.lock().is_current(ticket);
        if cancel.is_cancelled() || !still_current {
            return self.fail(ticket, CANCELLED_REASON);
        }

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.fail(ticket, CANCELLED_REASON),
            opened = self.backend.stream_chat(request, cancel.clone()) => opened,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => return self.fail(ticket, &e.to_string()),
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = events.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            let applied = self.transcript.lock().apply(ticket, &event);
            match (applied, &event) {
                (Applied::Discarded, _) => {
                    tracing::debug!("Dropping events for superseded send");
                    return SubmitOutcome::Discarded;
                }
                (Applied::Updated, StreamEvent::Append { content }) => {
                    self.emit(SessionEvent::StreamDelta {
                        message_id: ticket.placeholder_id.clone(),
                        fragment: content.clone(),
                    });
                }
                (Applied::Finished, _) => return self.finished(ticket, &event),
                _ => {}
            }
        }

        let still_current = self.transcript.lock().is_current(ticket);
        if !still_current {
            return SubmitOutcome::Discarded;
        }
        let reason = if cancel.is_cancelled() {
            CANCELLED_REASON
        } else {
            TRUNCATED_STREAM_MESSAGE
        };
        self.fail(ticket, reason)
    }

    fn fail(&self, ticket: &StreamTicket, reason: &str) -> SubmitOutcome {
        let applied = self.transcript.lock().on_fail(ticket, reason);
        match applied {
            Applied::Discarded => SubmitOutcome::Discarded,
            _ => self.finished(
                ticket,
                &StreamEvent::Fail {
                    message: reason.to_string(),
                },
            ),
        }
    }

    fn finished(&self, ticket: &StreamTicket, event: &StreamEvent) -> SubmitOutcome {
        let Some(message) = self.transcript.lock().message(&ticket.placeholder_id).cloned() else {
            return SubmitOutcome::Discarded;
        };

        match (message.state, event) {
            (MessageState::Failed, StreamEvent::Fail { message: reason }) => {
                self.emit(SessionEvent::MessageFailed {
                    message: message.clone(),
                    reason: reason.clone(),
                });
                SubmitOutcome::Failed {
                    message,
                    reason: reason.clone(),
                }
            }
            _ => {
                self.emit(SessionEvent::MessageCompleted {
                    message: message.clone(),
                });
                SubmitOutcome::Completed { message }
            }
        }
    }
}
