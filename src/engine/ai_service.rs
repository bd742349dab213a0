//! Remote AI mesh service adapter
//!
//! The network boundary is [`ModelServiceClient`]; [`HttpModelServiceClient`]
//! is the reqwest implementation. [`AiServiceEngine`] adds the request
//! timeout, a single rate-limit backoff and cancellation on top.

use super::{EngineKind, EngineResult, GenerationEngine};
use crate::cancel::CancelSignal;
use crate::config::AiServiceConfig;
use crate::error::EngineError;
use crate::geometry::{Mesh, Vec3};
use crate::progress::ProgressReporter;
use crate::request::GenerationSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Request body sent to the mesh service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub model: String,
    pub prompt: String,
    pub complexity: u8,
    pub detail_level: u8,
    pub material_style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    pub fingerprint: String,
}

impl ServiceRequest {
    pub fn from_spec(model: &str, spec: &GenerationSpec) -> Self {
        Self {
            model: model.to_string(),
            prompt: spec.normalized_prompt(),
            complexity: spec.complexity,
            detail_level: spec.detail_level,
            material_style: spec.material_style.as_str().to_string(),
            reference_image: spec.reference_image.as_ref().map(|image| {
                image
                    .digest
                    .clone()
                    .unwrap_or_else(|| image.location.to_string_lossy().into_owned())
            }),
            fingerprint: spec.fingerprint().to_string(),
        }
    }
}

/// Mesh payload returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMesh {
    /// `ok`, `partial` or `error`
    pub status: String,
    #[serde(default)]
    pub vertices: Vec<Vec3>,
    #[serde(default)]
    pub faces: Vec<[u32; 3]>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub warning: Option<String>,
}

/// Network boundary of the AI engine
#[async_trait]
pub trait ModelServiceClient: Send + Sync {
    async fn generate_mesh(&self, request: &ServiceRequest) -> Result<ServiceMesh, EngineError>;
}

fn map_http_error(error: reqwest::Error) -> EngineError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            401 | 403 => EngineError::Auth(format!("Authentication failed: {}", error)),
            429 => EngineError::RateLimit(format!("Rate limit exceeded: {}", error)),
            _ => EngineError::Request(format!("Request failed with status {}: {}", status, error)),
        }
    } else if error.is_timeout() {
        EngineError::Timeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        EngineError::Request(format!("Connection error: {}", error))
    } else if error.is_decode() {
        EngineError::InvalidResponse(format!("Failed to parse response: {}", error))
    } else {
        EngineError::Request(format!("HTTP error: {}", error))
    }
}

const SERVICE_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-over-HTTP client with bearer authentication
pub struct HttpModelServiceClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpModelServiceClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(SERVICE_HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ModelServiceClient for HttpModelServiceClient {
    async fn generate_mesh(&self, request: &ServiceRequest) -> Result<ServiceMesh, EngineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                401 | 403 => EngineError::Auth(format!("Authentication failed: {}", error_text)),
                429 => EngineError::RateLimit(format!("Rate limit exceeded: {}", error_text)),
                408 | 504 => EngineError::Timeout(format!("Service timed out: {}", error_text)),
                _ => EngineError::Request(format!(
                    "Request failed with status {}: {}",
                    status, error_text
                )),
            });
        }

        response
            .json::<ServiceMesh>()
            .await
            .map_err(|e| EngineError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

/// Engine backed by a remote mesh service
pub struct AiServiceEngine {
    client: Arc<dyn ModelServiceClient>,
    model: String,
    request_timeout: Duration,
    rate_limit_backoff: Duration,
}

impl AiServiceEngine {
    pub fn new(client: Arc<dyn ModelServiceClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            request_timeout: Duration::from_secs(60),
            rate_limit_backoff: Duration::from_secs(2),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    /// Build the HTTP-backed engine; `None` when endpoint or API key is missing
    pub fn from_config(config: &AiServiceConfig) -> Result<Option<Self>, EngineError> {
        let (Some(endpoint), Some(api_key)) = (&config.endpoint, &config.api_key) else {
            return Ok(None);
        };
        let request_timeout = config.request_timeout();
        let client = HttpModelServiceClient::new(endpoint.clone(), api_key.clone(), request_timeout)?;
        Ok(Some(
            Self::new(Arc::new(client), config.model.clone())
                .with_request_timeout(request_timeout)
                .with_rate_limit_backoff(config.rate_limit_backoff()),
        ))
    }

    async fn request_once(&self, request: &ServiceRequest) -> Result<ServiceMesh, EngineError> {
        match tokio::time::timeout(self.request_timeout, self.client.generate_mesh(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn request_with_backoff(
        &self,
        request: &ServiceRequest,
    ) -> Result<ServiceMesh, EngineError> {
        match self.request_once(request).await {
            Err(EngineError::RateLimit(message)) => {
                warn!(
                    backoff_ms = self.rate_limit_backoff.as_millis() as u64,
                    error = %message,
                    "Mesh service rate limited, backing off once"
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
                self.request_once(request).await
            }
            other => other,
        }
    }

    fn into_result(&self, response: ServiceMesh) -> Result<EngineResult, EngineError> {
        let soft_failure = match response.status.as_str() {
            "ok" => None,
            "partial" => Some(
                response
                    .warning
                    .clone()
                    .unwrap_or_else(|| "service returned a partial mesh".to_string()),
            ),
            "error" => {
                return Err(EngineError::Request(
                    response
                        .warning
                        .unwrap_or_else(|| "service reported an error".to_string()),
                ))
            }
            other => {
                return Err(EngineError::InvalidResponse(format!(
                    "unknown status '{}'",
                    other
                )))
            }
        };

        let quality = response.quality.unwrap_or(0.8).clamp(0.0, 1.0);
        let mut metadata = response.metadata;
        metadata.insert("generator".to_string(), "ai_service".to_string());
        metadata.insert("model".to_string(), self.model.clone());

        let mesh = Mesh {
            vertices: response.vertices,
            faces: response.faces,
            ..Mesh::default()
        };
        let result = EngineResult::new(EngineKind::Ai, mesh, metadata, quality)?;
        Ok(match soft_failure {
            Some(reason) => result.with_soft_failure(reason),
            None => result,
        })
    }
}

#[async_trait]
impl GenerationEngine for AiServiceEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Ai
    }

    async fn generate(
        &self,
        spec: &GenerationSpec,
        cancel: &CancelSignal,
        progress: &ProgressReporter,
    ) -> Result<EngineResult, EngineError> {
        let request = ServiceRequest::from_spec(&self.model, spec);
        debug!(
            model = %self.model,
            fingerprint = %spec.fingerprint().short(),
            "Requesting mesh from service"
        );
        progress.report(10, &format!("requesting mesh from {}", self.model));

        let response = tokio::select! {
            response = self.request_with_backoff(&request) => response?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };
        progress.report(90, "validating service mesh");
        self.into_result(response)
    }
}
