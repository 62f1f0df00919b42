// Module: Gateway
// Request/response contract with the browser-automation backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::errors::ErrorCode;
use crate::protocol::{DetectedElement, RecordedAction, StepResult, TestStep};

/// Failure of a gateway call, before the backend's own `success` flag is
/// even consulted.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("automation backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("automation backend returned HTTP {status}")]
    Status { status: u16 },

    #[error("recording session not found")]
    SessionNotFound,
}

impl GatewayError {
    /// Transient failures keep the last known state and wait for the next
    /// poll tick; non-transient ones force the recording session to end.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::SessionNotFound)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Transport(_) => ErrorCode::BACKEND_UNREACHABLE,
            GatewayError::Status { .. } => ErrorCode::BACKEND_STATUS,
            GatewayError::SessionNotFound => ErrorCode::SESSION_ENDED,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRecordingRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedActionsResponse {
    pub success: bool,
    #[serde(default)]
    pub sequence: Option<Vec<RecordedAction>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub session_ended: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRecordingRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingResponse {
    pub success: bool,
    #[serde(default)]
    pub sequence: Option<Vec<RecordedAction>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTestRequest {
    pub url: String,
    pub sequence: Vec<TestStep>,
    pub elements: Vec<DetectedElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTestResponse {
    pub success: bool,
    #[serde(default)]
    pub steps: Option<Vec<StepResult>>,
    #[serde(default)]
    pub detected_elements: Option<Vec<DetectedElement>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
}

/// The four backend operations the engine consumes. A trait so engine tests
/// can substitute an in-memory fake for the HTTP implementation.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn start_recording(&self, url: &str) -> Result<StartRecordingResponse, GatewayError>;

    async fn recorded_actions(
        &self,
        session_id: &str,
    ) -> Result<RecordedActionsResponse, GatewayError>;

    async fn stop_recording(&self, session_id: &str)
        -> Result<StopRecordingResponse, GatewayError>;

    async fn execute_direct(
        &self,
        request: &ExecuteTestRequest,
    ) -> Result<ExecuteTestResponse, GatewayError>;
}

/// reqwest-backed gateway against a configurable base URL.
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn check_status(status: StatusCode) -> Result<(), GatewayError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::Status { status: status.as_u16() })
        }
    }
}

#[async_trait]
impl ExecutionGateway for HttpGateway {
    #[tracing::instrument(name = "start_recording", skip_all, fields(url = %url))]
    async fn start_recording(&self, url: &str) -> Result<StartRecordingResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/api/recording/start", self.base_url))
            .json(&StartRecordingRequest { url })
            .send()
            .await?;

        Self::check_status(response.status())?;
        let body: StartRecordingResponse = response.json().await?;
        tracing::info!(success = body.success, session_id = ?body.session_id, "recording start answered");
        Ok(body)
    }

    #[tracing::instrument(name = "recorded_actions", skip_all, fields(session_id = %session_id))]
    async fn recorded_actions(
        &self,
        session_id: &str,
    ) -> Result<RecordedActionsResponse, GatewayError> {
        // Session id travels as a query parameter on this endpoint.
        let url = format!(
            "{}/api/recording/actions?sessionId={}",
            self.base_url,
            urlencoding::encode(session_id)
        );
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::SessionNotFound);
        }
        Self::check_status(response.status())?;

        let body: RecordedActionsResponse = response.json().await?;
        tracing::debug!(
            success = body.success,
            actions = body.sequence.as_ref().map(Vec::len).unwrap_or(0),
            session_ended = body.session_ended,
            "poll answered"
        );
        Ok(body)
    }

    #[tracing::instrument(name = "stop_recording", skip_all, fields(session_id = %session_id))]
    async fn stop_recording(
        &self,
        session_id: &str,
    ) -> Result<StopRecordingResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/api/recording/stop", self.base_url))
            .json(&StopRecordingRequest { session_id })
            .send()
            .await?;

        Self::check_status(response.status())?;
        let body: StopRecordingResponse = response.json().await?;
        tracing::info!(success = body.success, "recording stop answered");
        Ok(body)
    }

    #[tracing::instrument(name = "execute_direct", skip_all, fields(steps = request.sequence.len()))]
    async fn execute_direct(
        &self,
        request: &ExecuteTestRequest,
    ) -> Result<ExecuteTestResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/api/tests/execute-direct", self.base_url))
            .json(request)
            .send()
            .await?;

        Self::check_status(response.status())?;
        let body: ExecuteTestResponse = response.json().await?;
        tracing::info!(
            success = body.success,
            steps = body.steps.as_ref().map(Vec::len).unwrap_or(0),
            duration_ms = body.duration,
            "direct execution answered"
        );
        Ok(body)
    }
}
