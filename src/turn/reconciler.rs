//! Post-turn session cache reconciliation.
//!
//! After a turn finishes, the cache is brought in line with what was
//! persisted so the next turn within the TTL resolves without touching the
//! provider or the store. Every failure here is logged and swallowed; the
//! durable store already holds the truth.

use tracing::{debug, warn};

use crate::cache::{CacheError, SessionCache, SessionData};
use crate::models::ChatHistoryEntry;

use super::resolver::ResolvedSession;

pub struct SessionReconciler<'a> {
    pub cache: &'a dyn SessionCache,
}

impl SessionReconciler<'_> {
    /// Update the cached session for a finished turn.
    ///
    /// `turn_entries` is the turn's (user, assistant) pair, in that order.
    /// Behavior per capability flags:
    /// backends without unified history keep no session at all; backends that
    /// manage their own history keep a session (cached config) but no
    /// mirrored entries; everyone else gets the turn appended.
    pub async fn reconcile(
        &self,
        resolved: &ResolvedSession,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        turn_entries: Vec<ChatHistoryEntry>,
    ) {
        let settings = &resolved.config.settings;
        if !settings.uses_unified_history {
            return;
        }

        if settings.manages_own_history {
            // Keep the config warm, never mirror history.
            match self.cache.get(tenant_id, user_id, conversation_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.create(resolved, tenant_id, user_id, conversation_id, Vec::new())
                        .await;
                }
                Err(e) => {
                    warn!(tenant_id, conversation_id, error = %e, "session cache read failed");
                }
            }
            return;
        }

        match self
            .cache
            .append_history(tenant_id, user_id, conversation_id, turn_entries.clone())
            .await
        {
            Ok(()) => {
                debug!(tenant_id, conversation_id, appended = turn_entries.len(), "session history appended");
            }
            Err(CacheError::NotFound) => {
                // Expired or never created; seed with just this turn. The
                // durable store remains the source of truth for anything
                // older.
                self.create(resolved, tenant_id, user_id, conversation_id, turn_entries)
                    .await;
            }
            Err(e) => {
                warn!(tenant_id, conversation_id, error = %e, "session history append failed");
            }
        }
    }

    async fn create(
        &self,
        resolved: &ResolvedSession,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        history: Vec<ChatHistoryEntry>,
    ) {
        let session = SessionData::new(
            tenant_id,
            user_id,
            conversation_id,
            resolved.config.clone(),
            history,
        );
        if let Err(e) = self.cache.set(session).await {
            warn!(tenant_id, conversation_id, error = %e, "session cache write failed");
        }
    }
}
