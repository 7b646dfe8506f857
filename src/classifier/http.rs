//! HTTP classifier client.
//!
//! Sends the payload to a model-serving endpoint and reads back either a
//! single top prediction or a ranked list of predictions.
//!
//! Request body:
//!
//! ```json
//! {"input": "https://images.example.com/offer/42.jpg"}
//! ```
//!
//! Accepted responses:
//!
//! ```json
//! {"label": "cat", "confidence": 0.92}
//! {"predictions": [{"label": "cat", "confidence": 0.92}, {"label": "dog", "confidence": 0.05}]}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Classification, Classifier};
use crate::error::ClassifyError;

/// Default request timeout when none is configured.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Top(Prediction),
    Ranked { predictions: Vec<Prediction> },
}

#[derive(Debug, Deserialize)]
struct Prediction {
    label: String,
    confidence: f64,
}

/// Client for an HTTP classification endpoint.
pub struct HttpClassifier {
    /// Classification endpoint URL.
    endpoint: String,
    /// HTTP client, reused for every request of this worker.
    http_client: Client,
}

impl HttpClassifier {
    /// Creates a classifier bound to `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - URL accepting `POST {"input": ...}`
    /// * `request_timeout` - Per-request HTTP timeout
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ClassifyError> {
        let http_client = Client::builder()
            .timeout(request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()
            .map_err(|e| ClassifyError::RequestFailed(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
        })
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, payload: &[u8]) -> Result<Classification, ClassifyError> {
        let input = std::str::from_utf8(payload).map_err(|e| {
            ClassifyError::InvalidPayload(format!("payload is not valid UTF-8: {}", e))
        })?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&ClassifyRequest { input })
            .send()
            .await
            .map_err(|e| ClassifyError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifyError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(ClassifyError::Status {
                code: status.as_u16(),
                message: body,
            });
        }

        parse_response(&body)
    }
}

/// Parses a classifier response body and keeps the top-scoring prediction.
fn parse_response(body: &str) -> Result<Classification, ClassifyError> {
    let response: ClassifyResponse =
        serde_json::from_str(body).map_err(|e| ClassifyError::ParseError(e.to_string()))?;

    let top = match response {
        ClassifyResponse::Top(prediction) => prediction,
        ClassifyResponse::Ranked { predictions } => predictions
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or(ClassifyError::NoPrediction)?,
    };

    Classification::new(top.label, top.confidence)
}
