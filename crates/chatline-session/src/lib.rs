//! chatline-session: Transcript state for streaming chat
//!
//! This crate owns the message list of the open conversation and reconciles
//! it with the backend: optimistic sends, placeholder replies filled in from
//! the response stream, and gating of events that arrive after the
//! conversation has moved on.

pub mod error;
pub mod events;
pub mod handle;
pub mod session;
pub mod transcript;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use session::{CANCELLED_REASON, ChatSession, NO_REPLY_REASON, SubmitOutcome};
pub use transcript::{Applied, RESPONSE_ERROR_TEXT, StreamTicket, Transcript};
