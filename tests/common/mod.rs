//! Common test utilities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use chatgate::agent::{
    AgentInvoker, Chunk, ChunkReadError, ChunkStream, InvokeError, InvokeRequest, InvokerFactory,
};
use chatgate::background::BackgroundTasks;
use chatgate::cache::MemorySessionCache;
use chatgate::platform::{AgentConfig, AgentSettings, ConfigProvider, PlatformError};
use chatgate::server::{self, AppState};
use chatgate::store::MemoryMessageStore;
use chatgate::turn::TurnDeps;

pub type Script = Vec<Result<Chunk, ChunkReadError>>;

// ============================================================================
// Scripted backend
// ============================================================================

pub struct ScriptedProvider {
    config: AgentConfig,
}

#[async_trait]
impl ConfigProvider for ScriptedProvider {
    async fn get_agent_config(
        &self,
        tenant_id: &str,
        application_id: &str,
        _conversation_id: &str,
        _auth_token: &str,
    ) -> Result<AgentConfig, PlatformError> {
        let mut config = self.config.clone();
        config.tenant_id = tenant_id.to_string();
        config.application_id = application_id.to_string();
        Ok(config)
    }
}

struct ScriptedInvoker {
    script: Mutex<Option<Script>>,
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, _request: InvokeRequest) -> Result<ChunkStream, InvokeError> {
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| InvokeError::Request("script exhausted".into()))?;
        Ok(Box::pin(futures::stream::iter(script)))
    }
}

/// Hands out one scripted chunk stream per invocation, in order.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    fail_create: bool,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fail_create: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fail_create: true,
        }
    }
}

impl InvokerFactory for ScriptedFactory {
    fn create(&self, _config: &AgentConfig) -> Result<Box<dyn AgentInvoker>, InvokeError> {
        if self.fail_create {
            return Err(InvokeError::Config("no backend configured".into()));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InvokeError::Request("script exhausted".into()))?;
        Ok(Box::new(ScriptedInvoker {
            script: Mutex::new(Some(script)),
        }))
    }
}

// ============================================================================
// App assembly
// ============================================================================

pub fn unified_config() -> AgentConfig {
    AgentConfig {
        agent_type: "workflow".into(),
        settings: AgentSettings {
            uses_unified_history: true,
            supports_multi_message_turn: true,
            chat_url: "http://backend/chat".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryMessageStore>,
    pub cache: Arc<MemorySessionCache>,
    pub background_tasks: BackgroundTasks,
}

/// Build a test app over a scripted backend.
pub fn scripted_app(config: AgentConfig, factory: ScriptedFactory) -> TestApp {
    let store = Arc::new(MemoryMessageStore::new());
    let cache = Arc::new(MemorySessionCache::default());
    let background_tasks = BackgroundTasks::new();

    let state = AppState {
        turn: TurnDeps {
            config_provider: Arc::new(ScriptedProvider { config }),
            store: store.clone(),
            cache: cache.clone(),
            invokers: Arc::new(factory),
        },
        keep_alive_interval_seconds: 15,
        max_connections: 16,
        background_tasks: background_tasks.clone(),
    };

    TestApp {
        app: server::build_app(state, 300),
        store,
        cache,
        background_tasks,
    }
}

// ============================================================================
// SSE helpers
// ============================================================================

/// Parse an SSE body into `(event, data)` pairs, ignoring comments.
pub fn parse_sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in body.lines() {
        if let Some(event_name) = line.strip_prefix("event:") {
            current_event = event_name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

/// Decode the JSON payloads of a parsed SSE body and return their `type`
/// markers in order.
pub fn signal_types(events: &[(String, String)]) -> Vec<String> {
    events
        .iter()
        .map(|(_, data)| {
            let value: serde_json::Value = serde_json::from_str(data).unwrap();
            value["type"].as_str().unwrap().to_string()
        })
        .collect()
}
