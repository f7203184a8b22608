//! REST client for a render server exposing `/sdapi/v1/*`.

use serde::Deserialize;

use renderq_core::task::TaskKind;

/// HTTP client for one render server.
pub struct RenderApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response body of `POST /sdapi/v1/txt2img` and `/img2img`.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    /// Base64-encoded PNG images, grids first.
    #[serde(default)]
    pub images: Vec<String>,
    /// JSON-encoded generation info.
    #[serde(default)]
    pub info: String,
}

/// Error body the server returns on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    errors: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Render API error ({status}): {error_type}: {message}")]
    ApiError {
        status: u16,
        /// Exception class name reported by the server, e.g. `OutOfMemoryError`.
        error_type: String,
        message: String,
    },
}

impl RenderApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:7860`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Run a generation and wait for its images.
    pub async fn generate(
        &self,
        kind: TaskKind,
        body: &serde_json::Value,
    ) -> Result<GenerateResponse, RenderApiError> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/{}", self.api_url, kind.as_str()))
            .json(body)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<GenerateResponse>().await?)
    }

    /// Interrupt whatever the server is generating right now.
    pub async fn interrupt(&self) -> Result<(), RenderApiError> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/interrupt", self.api_url))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RenderApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let (error_type, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => {
                let message = [body.errors, body.detail]
                    .into_iter()
                    .find(|m| !m.is_empty())
                    .unwrap_or(text);
                (body.error, message)
            }
            Err(_) => (String::new(), text),
        };
        Err(RenderApiError::ApiError {
            status: status.as_u16(),
            error_type,
            message,
        })
    }
}
