//! Agent configuration and the platform configuration provider.
//!
//! Every turn resolves an [`AgentConfig`] for its `(tenant, application)`
//! pair. Backend differences are expressed as capability flags on
//! [`AgentSettings`] rather than switches on a backend type, so adding a
//! backend means describing what it does, not teaching the engine a new name.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// History entries loaded per turn when the config does not say otherwise.
pub const DEFAULT_HISTORY_DEPTH: usize = 30;

// ============================================================================
// Config types
// ============================================================================

/// Capability flags and connection settings for one agent backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// The engine loads history and feeds it to the backend on each turn.
    #[serde(default)]
    pub uses_unified_history: bool,
    /// Max history entries per turn; `None` means [`DEFAULT_HISTORY_DEPTH`].
    #[serde(default)]
    pub history_depth: Option<usize>,
    /// The backend tracks its own conversation state; the engine keeps the
    /// cached session but stops mirroring history into it.
    #[serde(default)]
    pub manages_own_history: bool,
    /// The backend may split one turn into several assistant messages.
    #[serde(default)]
    pub supports_multi_message_turn: bool,
    /// Invocation endpoint.
    #[serde(default)]
    pub chat_url: String,
    /// Static bearer token for the invocation endpoint.
    #[serde(default)]
    pub chat_token: Option<String>,
}

/// Resolved configuration for an application's agent backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub doc_version: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub settings: AgentSettings,
}

impl AgentConfig {
    /// Effective history depth for this backend.
    pub fn history_depth(&self) -> usize {
        self.settings.history_depth.unwrap_or(DEFAULT_HISTORY_DEPTH)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("config request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("config request returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("config response invalid: {0}")]
    Parse(String),
}

// ============================================================================
// Provider
// ============================================================================

/// Source of agent configuration, one fetch per cache miss.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_agent_config(
        &self,
        tenant_id: &str,
        application_id: &str,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<AgentConfig, PlatformError>;
}

/// Fetches agent configuration from the platform service over HTTP.
pub struct HttpConfigProvider {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl HttpConfigProvider {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            service_key: service_key.into(),
            client,
        }
    }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    async fn get_agent_config(
        &self,
        tenant_id: &str,
        application_id: &str,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<AgentConfig, PlatformError> {
        let url = format!(
            "{}/api/v1/platform-service/tenants/{}/applications/{}/config",
            self.base_url, tenant_id, application_id
        );
        debug!(tenant_id, application_id, conversation_id, "fetching agent config");

        let response = self
            .client
            .get(&url)
            .header("X-Service-Key", &self.service_key)
            .bearer_auth(auth_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status { status, body });
        }

        let mut config: AgentConfig = response
            .json()
            .await
            .map_err(|e| PlatformError::Parse(e.to_string()))?;

        // The platform omits identity fields it considers implied by the URL.
        if config.tenant_id.is_empty() {
            config.tenant_id = tenant_id.to_string();
        }
        if config.application_id.is_empty() {
            config.application_id = application_id.to_string();
        }
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
