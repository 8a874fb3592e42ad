use async_trait::async_trait;
use eyre::eyre;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Base URL used when neither `--endpoint` nor `CHAT_ENDPOINT` is given.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000";

/// Anything that stops a reply from reaching the transcript.
///
/// Every variant is rendered to the user the same way; the variant only
/// matters for the diagnostic log.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A remote party that answers one chat message with one reply.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    async fn send(&self, message: &str) -> Result<String, DeliveryFailure>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    reply: String,
}

/// HTTP client for the `POST /chat` endpoint.
pub struct ChatClient {
    chat_url: Url,
    client: reqwest::Client,
}

impl ChatClient {
    /// Build a client posting to the `chat` segment under `base_url`.
    /// Query and fragment of the base are kept on the resulting URL.
    pub fn new(base_url: &Url) -> eyre::Result<Self> {
        let mut chat_url = base_url.clone();
        chat_url
            .path_segments_mut()
            .map_err(|_| eyre!("{} cannot be used as a base URL", base_url))?
            .pop_if_empty()
            .push("chat");

        Ok(Self {
            chat_url,
            client: reqwest::Client::new(),
        })
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }
}

#[async_trait]
impl ChatEndpoint for ChatClient {
    async fn send(&self, message: &str) -> Result<String, DeliveryFailure> {
        debug!("Sending message to {}: {:?}", self.chat_url, message);

        // `.json` sets `Content-Type: application/json`.
        let response = self.client.post(self.chat_url.clone())
            .json(&ChatRequest { message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let reply: ChatReply = serde_json::from_slice(&body)?;

        debug!("Received reply: {:?}", reply.reply);

        Ok(reply.reply)
    }
}
