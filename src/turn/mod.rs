//! Turn orchestration.
//!
//! One turn: resolve the session, open the backend stream, persist the user
//! message, aggregate the stream into assistant messages, and reconcile the
//! session cache. Each step receives what it needs explicitly; the only
//! shared state is behind the store/cache traits.

pub mod aggregator;
pub mod reconciler;
pub mod resolver;

pub use aggregator::{TurnAggregator, TurnOutcome};
pub use reconciler::SessionReconciler;
pub use resolver::{ResolvedSession, SessionResolver};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{InvokeRequest, InvokerFactory};
use crate::cache::SessionCache;
use crate::models::{Message, MessageRequest};
use crate::platform::ConfigProvider;
use crate::store::MessageStore;
use crate::transport::{SignalSink, StreamSignal};

/// Error codes carried on `ERROR` stream signals.
pub mod codes {
    /// Session or agent configuration could not be resolved.
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    /// The backend stream could not be established.
    pub const INVOCATION_ERROR: &str = "INVOCATION_ERROR";
    /// The established backend stream failed mid-read.
    pub const STREAM_ERROR: &str = "STREAM_ERROR";
    /// The backend reported an error chunk inside a live stream.
    pub const CHUNK_ERROR: &str = "CHUNK_ERROR";
}

/// Shared services a turn runs against.
#[derive(Clone)]
pub struct TurnDeps {
    pub config_provider: Arc<dyn ConfigProvider>,
    pub store: Arc<dyn MessageStore>,
    pub cache: Arc<dyn SessionCache>,
    pub invokers: Arc<dyn InvokerFactory>,
}

/// Everything one turn needs, resolved by the HTTP layer.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub application_id: String,
    /// Pre-assigned id for the user message.
    pub user_message_id: String,
    /// Pre-assigned id for the first assistant message, announced in
    /// `STREAM_START`.
    pub assistant_message_id: String,
    pub content: String,
    pub auth_token: String,
    pub history_depth: Option<usize>,
    /// Original request payload, attached to the user message for audit.
    pub request: Option<MessageRequest>,
}

/// Run one turn to completion.
///
/// Returns `None` when the turn aborted before the backend stream was
/// established (nothing persisted), `Some` with the outcome otherwise.
pub async fn run_turn(
    deps: &TurnDeps,
    request: TurnRequest,
    sink: &dyn SignalSink,
    cancel: CancellationToken,
) -> Option<TurnOutcome> {
    let resolver = SessionResolver {
        cache: deps.cache.as_ref(),
        provider: deps.config_provider.as_ref(),
        store: deps.store.as_ref(),
    };

    let resolved = match resolver
        .resolve(
            &request.tenant_id,
            &request.user_id,
            &request.conversation_id,
            &request.application_id,
            &request.auth_token,
            request.history_depth,
        )
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(
                tenant_id = %request.tenant_id,
                conversation_id = %request.conversation_id,
                error = %e,
                "session resolution failed"
            );
            abort(sink, codes::CONFIG_ERROR, "could not resolve agent configuration", &e.to_string())
                .await;
            return None;
        }
    };

    let invoker = match deps.invokers.create(&resolved.config) {
        Ok(invoker) => invoker,
        Err(e) => {
            error!(conversation_id = %request.conversation_id, error = %e, "invoker creation failed");
            abort(sink, codes::INVOCATION_ERROR, "could not reach the agent backend", &e.to_string())
                .await;
            return None;
        }
    };

    let stream = match invoker
        .invoke(InvokeRequest {
            conversation_id: request.conversation_id.clone(),
            message: request.content.clone(),
            chat_history: resolved.chat_history.clone(),
        })
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            error!(conversation_id = %request.conversation_id, error = %e, "backend invocation failed");
            abort(sink, codes::INVOCATION_ERROR, "could not reach the agent backend", &e.to_string())
                .await;
            return None;
        }
    };

    // The stream is established: the turn is now real. Announce it, then
    // write the user message so an aborted invocation leaves no records.
    if sink
        .send(StreamSignal::Start {
            message_id: request.assistant_message_id.clone(),
            conversation_id: request.conversation_id.clone(),
        })
        .await
        .is_err()
    {
        info!(conversation_id = %request.conversation_id, "client gone before stream start");
        return None;
    }

    let user_message = Message::user(
        request.user_message_id.as_str(),
        request.tenant_id.as_str(),
        request.conversation_id.as_str(),
        request.application_id.as_str(),
        request.user_id.as_str(),
        request.content.as_str(),
        request.request.clone(),
    );
    if let Err(e) = deps.store.add(&user_message).await {
        warn!(message_id = %user_message.id, error = %e, "failed to persist user message");
    }

    let first = Message::assistant(
        request.assistant_message_id.as_str(),
        request.tenant_id.as_str(),
        request.conversation_id.as_str(),
        request.application_id.as_str(),
        request.user_message_id.as_str(),
    );
    let aggregator = TurnAggregator::new(
        first,
        resolved.config.agent_type.clone(),
        resolved.config.settings.supports_multi_message_turn,
    );
    let outcome = aggregator
        .run(stream, sink, deps.store.as_ref(), cancel)
        .await;

    // The cached history grows by exactly one (user, assistant) pair per
    // turn; the last finalized message carries the turn's concluding state.
    let mut turn_entries = vec![user_message.to_history_entry()];
    if let Some(last) = outcome.messages.last() {
        turn_entries.push(last.to_history_entry());
    }
    let reconciler = SessionReconciler {
        cache: deps.cache.as_ref(),
    };
    reconciler
        .reconcile(
            &resolved,
            &request.tenant_id,
            &request.user_id,
            &request.conversation_id,
            turn_entries,
        )
        .await;

    info!(
        conversation_id = %request.conversation_id,
        messages = outcome.messages.len(),
        persist_failures = outcome.persist_failures,
        cancelled = outcome.cancelled,
        from_cache = resolved.from_cache,
        "turn finished"
    );
    Some(outcome)
}

async fn abort(sink: &dyn SignalSink, code: &str, message: &str, detail: &str) {
    let _ = sink
        .send(StreamSignal::Error {
            code: code.to_string(),
            message: message.to_string(),
            detail: detail.to_string(),
        })
        .await;
    let _ = sink.send(StreamSignal::End).await;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::agent::{AgentInvoker, Chunk, ChunkReadError, ChunkStream, InvokeError};
    use crate::cache::MemorySessionCache;
    use crate::models::MessageStatus;
    use crate::platform::{AgentConfig, AgentSettings, PlatformError};
    use crate::store::{MemoryMessageStore, SortOrder};
    use crate::transport::test_sink::RecordingSink;

    type Script = Vec<Result<Chunk, ChunkReadError>>;

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

    /// Hands out one scripted stream per created invoker.
    struct ScriptedFactory {
        scripts: Mutex<VecDeque<Script>>,
        fail_create: bool,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                fail_create: false,
            }
        }

        fn failing() -> Self {
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

    struct CountingProvider {
        config: Result<AgentConfig, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConfigProvider for CountingProvider {
        async fn get_agent_config(
            &self,
            _tenant_id: &str,
            _application_id: &str,
            _conversation_id: &str,
            _auth_token: &str,
        ) -> Result<AgentConfig, PlatformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.config
                .clone()
                .map_err(PlatformError::Parse)
        }
    }

    fn unified_config() -> AgentConfig {
        AgentConfig {
            agent_type: "workflow".into(),
            tenant_id: "t1".into(),
            application_id: "app_1".into(),
            settings: AgentSettings {
                uses_unified_history: true,
                supports_multi_message_turn: true,
                chat_url: "http://backend/chat".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn deps(config: AgentConfig, factory: ScriptedFactory) -> TurnDeps {
        TurnDeps {
            config_provider: Arc::new(CountingProvider {
                config: Ok(config),
                calls: AtomicUsize::new(0),
            }),
            store: Arc::new(MemoryMessageStore::new()),
            cache: Arc::new(MemorySessionCache::default()),
            invokers: Arc::new(factory),
        }
    }

    fn turn_request(n: u32) -> TurnRequest {
        TurnRequest {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            conversation_id: "conv_1".into(),
            application_id: "app_1".into(),
            user_message_id: format!("msg_u{n}"),
            assistant_message_id: format!("msg_a{n}"),
            content: format!("question {n}"),
            auth_token: "token".into(),
            history_depth: None,
            request: None,
        }
    }

    #[tokio::test]
    async fn successful_turn_persists_and_caches() {
        let deps = deps(
            unified_config(),
            ScriptedFactory::new(vec![vec![
                Ok(Chunk::Content("answer".into())),
                Ok(Chunk::Done(None)),
            ]]),
        );
        let sink = RecordingSink::new();

        let outcome = run_turn(&deps, turn_request(1), &sink, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 1);
        let signals = sink.recorded();
        assert!(matches!(&signals[0], StreamSignal::Start { message_id, .. } if message_id == "msg_a1"));
        assert_eq!(*signals.last().unwrap(), StreamSignal::End);

        // User and assistant messages persisted.
        let history = deps
            .store
            .list_history("conv_1", "t1", 10, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "question 1");
        assert_eq!(history[1].content, "answer");

        // Session cached with the turn mirrored.
        let session = deps.cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(session.chat_history.len(), 2);
    }

    #[tokio::test]
    async fn second_turn_resolves_from_cache() {
        let provider = Arc::new(CountingProvider {
            config: Ok(unified_config()),
            calls: AtomicUsize::new(0),
        });
        let deps = TurnDeps {
            config_provider: provider.clone(),
            store: Arc::new(MemoryMessageStore::new()),
            cache: Arc::new(MemorySessionCache::default()),
            invokers: Arc::new(ScriptedFactory::new(vec![
                vec![Ok(Chunk::Content("one".into()))],
                vec![Ok(Chunk::Content("two".into()))],
            ])),
        };

        run_turn(&deps, turn_request(1), &RecordingSink::new(), CancellationToken::new())
            .await
            .unwrap();
        run_turn(&deps, turn_request(2), &RecordingSink::new(), CancellationToken::new())
            .await
            .unwrap();

        // Config was fetched only for the first turn.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let session = deps.cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(session.chat_history.len(), 4);
    }

    #[tokio::test]
    async fn invocation_failure_persists_nothing() {
        let deps = deps(unified_config(), ScriptedFactory::failing());
        let sink = RecordingSink::new();

        let outcome = run_turn(&deps, turn_request(1), &sink, CancellationToken::new()).await;
        assert!(outcome.is_none());

        let signals = sink.recorded();
        assert_eq!(signals.len(), 2);
        assert!(matches!(
            &signals[0],
            StreamSignal::Error { code, .. } if code == codes::INVOCATION_ERROR
        ));
        assert_eq!(signals[1], StreamSignal::End);

        let history = deps
            .store
            .list_history("conv_1", "t1", 10, SortOrder::Asc)
            .await
            .unwrap();
        assert!(history.is_empty());
        assert!(deps.cache.get("t1", "u1", "conv_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn config_failure_reports_config_error() {
        let deps = TurnDeps {
            config_provider: Arc::new(CountingProvider {
                config: Err("platform unavailable".into()),
                calls: AtomicUsize::new(0),
            }),
            store: Arc::new(MemoryMessageStore::new()),
            cache: Arc::new(MemorySessionCache::default()),
            invokers: Arc::new(ScriptedFactory::new(vec![])),
        };
        let sink = RecordingSink::new();

        let outcome = run_turn(&deps, turn_request(1), &sink, CancellationToken::new()).await;
        assert!(outcome.is_none());
        assert!(matches!(
            &sink.recorded()[0],
            StreamSignal::Error { code, .. } if code == codes::CONFIG_ERROR
        ));
    }

    #[tokio::test]
    async fn multi_message_turn_caches_exactly_one_pair() {
        let deps = deps(
            unified_config(),
            ScriptedFactory::new(vec![vec![
                Ok(Chunk::Content("first".into())),
                Ok(Chunk::NewMessage(None)),
                Ok(Chunk::Content("second".into())),
            ]]),
        );

        let outcome = run_turn(&deps, turn_request(1), &RecordingSink::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.messages.len(), 2);

        // Both segments are persisted, but the cached history still grows by
        // exactly the (user, assistant) pair.
        let session = deps.cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(session.chat_history.len(), 2);
        assert_eq!(session.chat_history[0].content, "question 1");
        assert_eq!(session.chat_history[1].content, "second");
    }

    #[tokio::test]
    async fn error_turn_still_caches_the_pair() {
        let deps = deps(
            unified_config(),
            ScriptedFactory::new(vec![vec![
                Ok(Chunk::Content("partial".into())),
                Err(ChunkReadError("reset".into())),
            ]]),
        );

        let outcome = run_turn(&deps, turn_request(1), &RecordingSink::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].status, MessageStatus::Error);

        // Exactly two entries per turn, even when the assistant errored.
        let session = deps.cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(session.chat_history.len(), 2);
        assert_eq!(session.chat_history[0].content, "question 1");
        assert!(session.chat_history[1].content.is_empty());
    }
}
