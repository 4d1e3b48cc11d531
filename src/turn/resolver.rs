//! Session resolution.
//!
//! Produces the working `(config, history)` pair for a turn. Steady state is
//! a cache hit; a miss falls back to the configuration provider and, when the
//! backend relies on unified history, a durable-store history read. The cache
//! is never authoritative for correctness: any read failure degrades to the
//! miss path.

use tracing::{debug, warn};

use crate::cache::SessionCache;
use crate::models::ChatHistoryEntry;
use crate::platform::{AgentConfig, ConfigProvider, PlatformError};
use crate::store::{MessageStore, SortOrder};

/// Working state for one turn.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub config: AgentConfig,
    pub chat_history: Vec<ChatHistoryEntry>,
    pub from_cache: bool,
}

pub struct SessionResolver<'a> {
    pub cache: &'a dyn SessionCache,
    pub provider: &'a dyn ConfigProvider,
    pub store: &'a dyn MessageStore,
}

impl SessionResolver<'_> {
    /// Resolve the session for a turn.
    ///
    /// `history_depth` overrides the config's depth when set. The bound is
    /// applied on both paths (most recent N entries), since the cache never
    /// trims at write time.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        application_id: &str,
        auth_token: &str,
        history_depth: Option<usize>,
    ) -> Result<ResolvedSession, PlatformError> {
        match self.cache.get(tenant_id, user_id, conversation_id).await {
            Ok(Some(session)) => {
                debug!(tenant_id, conversation_id, "session cache hit");
                let depth = history_depth.unwrap_or_else(|| session.config.history_depth());
                let history = last_n(session.chat_history, depth);
                return Ok(ResolvedSession {
                    config: session.config,
                    chat_history: history,
                    from_cache: true,
                });
            }
            Ok(None) => {
                debug!(tenant_id, conversation_id, "session cache miss");
            }
            Err(e) => {
                // Fail open: a broken cache must not block the turn.
                warn!(tenant_id, conversation_id, error = %e, "session cache read failed");
            }
        }

        let config = self
            .provider
            .get_agent_config(tenant_id, application_id, conversation_id, auth_token)
            .await?;

        let depth = history_depth.unwrap_or_else(|| config.history_depth());
        let chat_history = if config.settings.uses_unified_history
            && !config.settings.manages_own_history
        {
            match self
                .store
                .list_history(conversation_id, tenant_id, depth, SortOrder::Asc)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    warn!(tenant_id, conversation_id, error = %e, "history load failed, starting empty");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(ResolvedSession {
            config,
            chat_history,
            from_cache: false,
        })
    }
}

fn last_n(mut entries: Vec<ChatHistoryEntry>, n: usize) -> Vec<ChatHistoryEntry> {
    let len = entries.len();
    if len > n {
        entries.drain(..len - n);
    }
    entries
}
