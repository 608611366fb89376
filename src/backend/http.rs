//! HTTP implementation of the generation backend.
//!
//! Posts a messages-style completion request and decodes the response
//! envelope: a `message` object carrying content blocks on success, or an
//! `error` envelope when the request was accepted at the HTTP layer but
//! failed semantically. The two failure paths map onto the two backend
//! fault kinds — transport/HTTP problems abort with `Transport`/`Api`,
//! in-band envelopes abort with `Content`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::errors::BackendError;

use super::{ChatMessage, GenerationBackend, GenerationRequest, RawResponse};

/// Wire request body.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

/// Wire response envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireResponse {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<WireBlock>,
    },
    #[serde(rename = "error")]
    Error { error: WireError },
}

/// One content block in a message response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

/// Backend client talking to a messages-style completion endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn invoke(&self, request: &GenerationRequest) -> Result<RawResponse, BackendError> {
        let body = WireRequest {
            model: &self.model,
            system: &request.system,
            messages: &request.messages,
            max_tokens: request.max_output_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| BackendError::Transport {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            // Error bodies often still carry a structured envelope; prefer
            // its message over the raw body.
            let message = match serde_json::from_str::<WireResponse>(&text) {
                Ok(WireResponse::Error { error }) => error.message,
                _ => text,
            };
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match serde_json::from_str::<WireResponse>(&text) {
            Ok(WireResponse::Message { content }) => {
                let blocks = content
                    .into_iter()
                    .filter_map(|block| match block {
                        WireBlock::Text { text } => Some(text),
                        WireBlock::Other => None,
                    })
                    .collect();
                Ok(RawResponse { blocks })
            }
            Ok(WireResponse::Error { error }) => Err(BackendError::Content {
                message: error.message,
            }),
            Err(e) => Err(BackendError::Content {
                message: format!("undecodable response envelope: {}", e),
            }),
        }
    }
}
