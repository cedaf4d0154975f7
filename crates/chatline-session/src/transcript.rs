//! Transcript state: the active conversation's messages and the in-flight send.

use chatline_client::{Attachment, Conversation, Message, MessageState, StreamEvent};

use crate::error::{Error, Result};

/// Text shown in place of an assistant reply that failed before producing
/// any content.
pub const RESPONSE_ERROR_TEXT: &str = "Failed to get a response. Please try again.";

/// Names one outgoing send and the two messages it created.
///
/// Every mutation driven by a stream must present the ticket it was issued.
/// Once the conversation is switched, reloaded or the send finishes, the
/// ticket goes stale and its events are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTicket {
    generation: u64,
    /// Optimistic user message id
    pub user_message_id: String,
    /// Assistant placeholder id
    pub placeholder_id: String,
}

impl StreamTicket {
    /// Monotonic counter distinguishing sends within one transcript
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What happened to a stream-driven mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Placeholder updated, still streaming
    Updated,
    /// Placeholder reached a terminal state
    Finished,
    /// Ticket was stale; nothing changed
    Discarded,
}

/// Ordered messages of the active conversation.
///
/// This is the only owner of the message list. Readers get slices or clones.
#[derive(Debug, Default)]
pub struct Transcript {
    conversation_id: Option<String>,
    messages: Vec<Message>,
    in_flight: Option<StreamTicket>,
    generation: u64,
}

impl Transcript {
    /// Create an empty transcript with no open conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript showing a server conversation
    pub fn from_conversation(conversation: Conversation) -> Self {
        let mut transcript = Self::new();
        transcript.load(conversation);
        transcript
    }

    /// Id of the open conversation
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// All messages in order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Look up a message by id
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The assistant message currently receiving fragments, if any
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming())
    }

    /// Whether a send is outstanding
    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether `ticket` still names the outstanding send
    pub fn is_current(&self, ticket: &StreamTicket) -> bool {
        self.in_flight.as_ref() == Some(ticket)
    }

    /// Replace everything with a server conversation.
    ///
    /// Any outstanding ticket goes stale.
    pub fn load(&mut self, conversation: Conversation) {
        self.generation += 1;
        self.in_flight = None;
        self.conversation_id = Some(conversation.id);
        self.messages = conversation.messages;
    }

    /// Close the conversation (e.g. after it was deleted)
    pub fn clear(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.conversation_id = None;
        self.messages.clear();
    }

    /// Append the optimistic user message and an empty assistant placeholder.
    ///
    /// Refused without any change when the text is blank and nothing is
    /// attached, when a send is already outstanding, or when no conversation
    /// is open.
    pub fn begin_submit(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<StreamTicket> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(Error::EmptyMessage);
        }
        if self.in_flight.is_some() {
            return Err(Error::SendInFlight);
        }
        if self.conversation_id.is_none() {
            return Err(Error::NoActiveConversation);
        }

        let user = Message::user(text, attachment);
        let placeholder = Message::assistant_placeholder();

        self.generation += 1;
        let ticket = StreamTicket {
            generation: self.generation,
            user_message_id: user.id.clone(),
            placeholder_id: placeholder.id.clone(),
        };

        self.messages.push(user);
        self.messages.push(placeholder);
        self.in_flight = Some(ticket.clone());

        Ok(ticket)
    }

    /// Record where the backend stored the ticket's attachment
    pub fn set_attachment_path(&mut self, ticket: &StreamTicket, server_path: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        let Some(attachment) = self
            .messages
            .iter_mut()
            .find(|m| m.id == ticket.user_message_id)
            .and_then(|m| m.attachment.as_mut())
        else {
            return false;
        };
        attachment.server_path = Some(server_path.to_string());
        true
    }

    /// Route a stream event to the matching transition
    pub fn apply(&mut self, ticket: &StreamTicket, event: &StreamEvent) -> Applied {
        match event {
            StreamEvent::Append { content } => self.on_append(ticket, content),
            StreamEvent::Complete => self.on_complete(ticket),
            StreamEvent::Fail { message } => self.on_fail(ticket, message),
        }
    }

    /// Concatenate a fragment onto the placeholder
    pub fn on_append(&mut self, ticket: &StreamTicket, fragment: &str) -> Applied {
        let Some(placeholder) = self.placeholder_mut(ticket) else {
            return Applied::Discarded;
        };
        placeholder.text.push_str(fragment);
        placeholder.state = MessageState::Accumulating;
        Applied::Updated
    }

    /// Finish the placeholder normally
    pub fn on_complete(&mut self, ticket: &StreamTicket) -> Applied {
        let Some(placeholder) = self.placeholder_mut(ticket) else {
            return Applied::Discarded;
        };
        placeholder.state = MessageState::Completed;
        self.in_flight = None;
        Applied::Finished
    }

    /// Fail the placeholder.
    ///
    /// Text streamed so far is kept. A placeholder that received nothing shows
    /// [`RESPONSE_ERROR_TEXT`] instead.
    pub fn on_fail(&mut self, ticket: &StreamTicket, reason: &str) -> Applied {
        let Some(placeholder) = self.placeholder_mut(ticket) else {
            return Applied::Discarded;
        };
        tracing::warn!(
            "Response failed after {} bytes: {}",
            placeholder.text.len(),
            reason
        );
        if placeholder.text.is_empty() {
            placeholder.text = RESPONSE_ERROR_TEXT.to_string();
        }
        placeholder.error = Some(RESPONSE_ERROR_TEXT.to_string());
        placeholder.state = MessageState::Failed;
        self.in_flight = None;
        Applied::Finished
    }

    /// Replace the optimistic list with the server's copy of the same
    /// conversation, closing the ticket.
    pub fn reconcile(&mut self, ticket: &StreamTicket, conversation: Conversation) -> Applied {
        if !self.is_current(ticket) || self.conversation_id() != Some(conversation.id.as_str()) {
            return Applied::Discarded;
        }
        self.messages = conversation.messages;
        self.in_flight = None;
        Applied::Finished
    }

    fn placeholder_mut(&mut self, ticket: &StreamTicket) -> Option<&mut Message> {
        if !self.is_current(ticket) {
            return None;
        }
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.id == ticket.placeholder_id)
            .filter(|m| m.is_streaming())
    }
}
