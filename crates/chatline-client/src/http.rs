//! HTTP implementation of the chat backend

use async_trait::async_trait;
use reqwest::{StatusCode, multipart};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::ChatBackend,
    error::{Error, Result},
    stream::{StreamEventStream, consume},
    types::{ChatRequest, Conversation, ConversationSummary, LocalFile, UploadReceipt},
};

/// Default backend location
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Connection settings for [`HttpBackend`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint path is joined onto (e.g. `http://host/api`)
    pub base_url: String,
    /// Timeout for establishing a connection. Streams themselves have no
    /// overall timeout since a response may legitimately take minutes.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a config for a base URL with default timeouts
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Check that the base URL is usable
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig("base URL is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got {}",
                url
            )));
        }
        Ok(())
    }
}

/// Chat backend reached over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend client from a validated config
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    /// The normalized base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Download location of an uploaded attachment
    pub fn attachment_url(&self, server_path: &str) -> String {
        self.url(&format!("uploads/{}", server_path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PinRequest<'a> {
    conversation_id: &'a str,
    pinned: bool,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(default)]
    pinned: bool,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    conversation: Conversation,
}

/// Map a non-success response to an error, preferring the JSON `error` field
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or(body);
    let message = if message.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        message
    };

    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(message));
    }
    Err(Error::api(status.as_u16(), message))
}

async fn file_part(file: &LocalFile) -> Result<multipart::Part> {
    let bytes = tokio::fs::read(&file.path).await?;
    let part = multipart::Part::bytes(bytes)
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)?;
    Ok(part)
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self.client.get(self.url("conversations")).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn get_conversation(&self, id: Option<&str>) -> Result<Conversation> {
        let mut request = self.client.get(self.url("conversation"));
        if let Some(id) = id {
            request = request.query(&[("id", id)]);
        }
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url("conversation"))
            .query(&[("id", id)])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn pin_conversation(&self, id: &str, pinned: bool) -> Result<bool> {
        let response = self
            .client
            .patch(self.url("conversation/pin"))
            .json(&PinRequest {
                conversation_id: id,
                pinned,
            })
            .send()
            .await?;
        let body: PinResponse = check_status(response).await?.json().await?;
        Ok(body.pinned)
    }

    async fn upload(&self, file: &LocalFile) -> Result<UploadReceipt> {
        let form = multipart::Form::new().part("file", file_part(file).await?);
        tracing::debug!("Uploading {} ({} bytes)", file.name, file.size);

        let response = self
            .client
            .post(self.url("upload"))
            .multipart(form)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream> {
        tracing::debug!(
            "Opening chat stream for conversation {}",
            request.conversation_id
        );

        let pending = self
            .client
            .post(self.url("chat/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send();

        // The backend may hold headers until the first token is ready
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = pending => response?,
        };
        let response = check_status(response).await?;

        Ok(consume(response.bytes_stream(), cancel))
    }

    async fn send_message(
        &self,
        request: &ChatRequest,
        file: Option<&LocalFile>,
    ) -> Result<Conversation> {
        let mut form = multipart::Form::new()
            .text("conversation_id", request.conversation_id.clone())
            .text("message", request.message.clone());
        if let Some(file) = file {
            form = form.part("file", file_part(file).await?);
        }

        let response = self
            .client
            .post(self.url("message"))
            .multipart(form)
            .send()
            .await?;
        let body: SendResponse = check_status(response).await?.json().await?;
        Ok(body.conversation)
    }
}
