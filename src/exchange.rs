// Exchange client: one round trip with the conversational service
//
// Wire contract: POST {"text": ...} as JSON, reply {"response": ...,
// "audio": base64-or-null}. Single attempt; failures are terminal for the
// current utterance.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/gemini";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded reply from the remote service.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub reply_text: String,
    pub reply_audio: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed reply: {0}")]
    Decode(String),
}

/// The single request/response round trip. Implementations must not retry;
/// the controller treats any failure as terminal for the utterance.
pub trait ExchangeService: Send + Sync {
    fn exchange(&self, text: &str) -> Result<ExchangeResult, ExchangeError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct WireReply {
    response: String,
    #[serde(default)]
    audio: Option<String>,
}

/// Decode a raw reply body into an [`ExchangeResult`].
///
/// Kept free of any transport so the wire handling is testable on its own.
pub fn parse_reply(body: &[u8]) -> Result<ExchangeResult, ExchangeError> {
    let reply: WireReply =
        serde_json::from_slice(body).map_err(|e| ExchangeError::Decode(e.to_string()))?;

    let reply_audio = match reply.audio {
        Some(encoded) if !encoded.is_empty() => Some(
            base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| ExchangeError::Decode(format!("invalid audio base64: {}", e)))?,
        ),
        _ => None,
    };

    Ok(ExchangeResult {
        reply_text: reply.response,
        reply_audio,
    })
}

/// Blocking HTTP client for the exchange endpoint.
pub struct HttpExchangeClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpExchangeClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ExchangeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn with_default_endpoint() -> Result<Self, ExchangeError> {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl ExchangeService for HttpExchangeClient {
    fn exchange(&self, text: &str) -> Result<ExchangeResult, ExchangeError> {
        log::info!("Exchanging utterance ({} chars)", text.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&WireRequest { text })
            .send()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExchangeError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                self.endpoint
            )));
        }

        let body = response
            .bytes()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let result = parse_reply(&body)?;
        log::info!(
            "Reply: {:?} (audio: {})",
            result.reply_text,
            result
                .reply_audio
                .as_ref()
                .map(|a| format!("{} bytes", a.len()))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(result)
    }
}
