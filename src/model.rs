//! Client for the hosted image model (Replicate predictions API).

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedded::EmbeddedImage;
use crate::feature::Feature;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Missing Replicate API token")]
    MissingCredential,
    #[error("request to replicate failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status; the message is the upstream body verbatim.
    #[error("{body}")]
    Status { status: u16, body: String },
    #[error("invalid prediction response: {0}")]
    Decode(String),
    #[error("No output from replicate")]
    NoOutput,
    #[error("Unexpected output format from replicate")]
    UnexpectedFormat,
    #[error("Failed to fetch {participle} image: {detail}")]
    FetchOutput {
        participle: &'static str,
        detail: String,
    },
}

/// What the model is asked to do. `input_image` is forwarded exactly as the
/// client sent it.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub feature: Feature,
    pub input_image: &'a str,
    pub prompt: Option<&'a str>,
}

/// Runs a prediction to completion and returns the output as a data URL.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn run(&self, request: ModelRequest<'_>) -> Result<String, ModelError>;
}

/// The shapes Replicate uses for `output`, after arrays are reduced to their
/// first element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionOutput {
    Url(String),
    Embedded(String),
    Base64(String),
    Empty,
    UnexpectedShape,
}

impl PredictionOutput {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Null => PredictionOutput::Empty,
            Value::String(s) => Self::from_string(s),
            Value::Array(items) => match items.into_iter().next() {
                Some(Value::String(s)) => Self::from_string(s),
                _ => PredictionOutput::UnexpectedShape,
            },
            _ => PredictionOutput::UnexpectedShape,
        }
    }

    fn from_string(s: String) -> Self {
        if s.is_empty() {
            PredictionOutput::Empty
        } else if s.starts_with("data:") {
            PredictionOutput::Embedded(s)
        } else if s.starts_with("http://") || s.starts_with("https://") {
            PredictionOutput::Url(s)
        } else {
            PredictionOutput::Base64(s)
        }
    }
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    input_image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'static str>,
}

#[derive(Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    output: Value,
}

#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl ReplicateClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_token: api_token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn endpoint(&self, feature: Feature) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            feature.model_path()
        )
    }

    async fn predict(
        &self,
        api_token: &str,
        request: ModelRequest<'_>,
    ) -> Result<PredictionOutput, ModelError> {
        let payload = PredictionRequest {
            input: match request.feature {
                Feature::Restore => PredictionInput {
                    input_image: request.input_image,
                    prompt: None,
                    output_format: None,
                },
                Feature::Edit => PredictionInput {
                    input_image: request.input_image,
                    prompt: request.prompt.map(str::trim),
                    output_format: Some("jpg"),
                },
            },
        };

        tracing::info!(feature = %request.feature, "sending prediction to replicate");

        let response = self
            .client
            .post(self.endpoint(request.feature))
            .bearer_auth(api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(
            status = status.as_u16(),
            body = %body.chars().take(300).collect::<String>(),
            "replicate responded"
        );

        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PredictionResponse =
            serde_json::from_str(&body).map_err(|e| ModelError::Decode(e.to_string()))?;
        Ok(PredictionOutput::classify(parsed.output))
    }

    async fn resolve(
        &self,
        feature: Feature,
        output: PredictionOutput,
    ) -> Result<String, ModelError> {
        match output {
            PredictionOutput::Embedded(data_url) => Ok(data_url),
            PredictionOutput::Url(url) => self.fetch_as_data_url(feature, &url).await,
            PredictionOutput::Base64(payload) => Ok(EmbeddedImage::from_base64(
                feature.default_output_mime(),
                payload,
            )
            .to_data_url(feature.default_output_mime())),
            PredictionOutput::Empty => Err(ModelError::NoOutput),
            PredictionOutput::UnexpectedShape => Err(ModelError::UnexpectedFormat),
        }
    }

    async fn fetch_as_data_url(&self, feature: Feature, url: &str) -> Result<String, ModelError> {
        let fetch_failed = |detail: String| ModelError::FetchOutput {
            participle: feature.participle(),
            detail,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        if !response.status().is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|e| e.to_string());
            return Err(fetch_failed(detail));
        }

        let mime = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .unwrap_or(feature.default_output_mime())
            .to_owned();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        tracing::debug!(%mime, len = bytes.len(), "fetched model output");
        Ok(EmbeddedImage::from_bytes(&mime, &bytes).to_data_url(&mime))
    }
}

#[async_trait]
impl ImageModel for ReplicateClient {
    async fn run(&self, request: ModelRequest<'_>) -> Result<String, ModelError> {
        let api_token = self
            .api_token
            .as_deref()
            .ok_or(ModelError::MissingCredential)?;
        let output = self.predict(api_token, request).await?;
        self.resolve(request.feature, output).await
    }
}
