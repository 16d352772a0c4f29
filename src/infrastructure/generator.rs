//! HTTP client for the external text-generation backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::{BackendError, TextGenerator};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    reply: String,
}

/// [`TextGenerator`] that POSTs `{"prompt": …}` to a backend endpoint and
/// expects `{"reply": …}` back.
///
/// Failures are reported as [`BackendError`]; the AI pipeline turns them
/// into in-band error replies rather than propagating them.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTextGenerator {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest { prompt })
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.reply)
    }
}
