//! Client for the object-detection service.
//!
//! [`HttpDetector`] posts one frame per request as multipart field `file`
//! to `{endpoint}/predict` and reads back the detections.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use vidflow_core::detection::Detection;

/// Errors from the detection layer.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// The HTTP request itself failed (network, timeout, TLS, decode).
    #[error("Detection request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-2xx status.
    #[error("Detection service error ({status}): {body}")]
    Service { status: u16, body: String },
}

/// Runs object detection on one encoded frame.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: Vec<u8>) -> Result<Vec<Detection>, DetectionError>;
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// HTTP client for the detection service.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    /// * `endpoint` - Base URL, e.g. `http://detector:8000`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { client, endpoint }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: Vec<u8>) -> Result<Vec<Detection>, DetectionError> {
        let part = Part::bytes(frame)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let response = self
            .client
            .post(format!("{}/predict", self.endpoint))
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::Service {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<PredictResponse>().await?.detections)
    }
}
