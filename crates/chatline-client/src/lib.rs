//! chatline-client: Chat backend client
//!
//! This crate provides the conversation data model, the incremental decoder for
//! the streaming chat endpoint, and an HTTP implementation of the backend API.

pub mod backend;
pub mod error;
pub mod http;
pub mod stream;
pub mod types;

pub use backend::ChatBackend;
pub use error::{Error, Result};
pub use http::{ClientConfig, HttpBackend};
pub use stream::{EventDecoder, StreamEvent, StreamEventStream};
pub use types::*;
