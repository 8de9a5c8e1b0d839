//! Session lifecycle: activation, resolve-or-create, destroy, and the
//! expired-session sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use sandboxer_core::{
    clock,
    config::SandboxConfig,
    ids,
    traits::{BaseSource, SessionStore},
    types::{
        row_id, NewOperation, Operation, RecordData, RequestContext, SandboxContext,
        SandboxSession,
    },
    Result,
};

use crate::storage::OverlayStorage;

/// Outcome of one expired-session sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Creates, looks up, and destroys sandbox sessions.
pub struct SessionRegistry {
    config: Arc<SandboxConfig>,
    sessions: Arc<dyn SessionStore>,
    storage: Arc<OverlayStorage>,
    base: Arc<dyn BaseSource>,
}

impl SessionRegistry {
    pub fn new(
        config: Arc<SandboxConfig>,
        sessions: Arc<dyn SessionStore>,
        storage: Arc<OverlayStorage>,
        base: Arc<dyn BaseSource>,
    ) -> Self {
        Self {
            config,
            sessions,
            storage,
            base,
        }
    }

    /// Resolve the request's sandbox scope.
    ///
    /// Returns an inactive context when sandboxing is off or nothing about
    /// the request activates it. A presented token that maps to a live
    /// session reuses it; an expired or unknown token silently falls back
    /// to creating a fresh session. When the returned context is
    /// `newly_created`, the caller must deliver its token to the client.
    pub async fn resolve_or_create(&self, request: &RequestContext) -> Result<SandboxContext> {
        if !self.config.enabled || !self.should_activate(request) {
            return Ok(SandboxContext::inactive());
        }

        if let Some(token) = &request.session_token {
            match self.sessions.find_by_token(token).await? {
                Some(session) if !session.is_expired(clock::now_unix()) => {
                    return Ok(SandboxContext::active(session.id, session.token, false));
                }
                Some(session) => {
                    tracing::debug!(session = %session.id, "Presented token maps to an expired session");
                }
                None => {
                    tracing::debug!("Presented token matches no session");
                }
            }
        }

        let session = self.create_session(request).await?;
        Ok(SandboxContext::active(session.id, session.token, true))
    }

    /// Whether this request should run sandboxed: any configured
    /// query-parameter match, any configured path prefix, or a presented
    /// session token.
    fn should_activate(&self, request: &RequestContext) -> bool {
        let activation = &self.config.activation;

        for (name, value) in &activation.parameters {
            if request.query.get(name) == Some(value) {
                return true;
            }
        }

        for prefix in &activation.paths {
            if !prefix.is_empty() && request.path.starts_with(prefix.as_str()) {
                return true;
            }
        }

        request.session_token.is_some()
    }

    async fn create_session(&self, request: &RequestContext) -> Result<SandboxSession> {
        let now = clock::now_unix();
        let initial_state = self.capture_initial_state().await?;

        let session = SandboxSession {
            id: ids::new_id(),
            token: ids::new_session_token(),
            client_address: request.client_address.clone(),
            client_agent: request.client_agent.clone(),
            expires_at: now + self.config.ttl_seconds as i64,
            initial_state: initial_state.clone(),
            metadata: RecordData::new(),
            created_at: now,
        };

        self.sessions.insert(&session).await?;
        self.seed_snapshot(&session.id, &initial_state).await?;
        self.seed_auth(&session.id).await?;

        tracing::info!(
            session = %session.id,
            expires_at = session.expires_at,
            "Created sandbox session"
        );

        Ok(session)
    }

    /// Snapshot the configured tables, filtered to the configured demo
    /// record ids. Captured once; the session never re-reads the base.
    async fn capture_initial_state(&self) -> Result<BTreeMap<String, Vec<RecordData>>> {
        let mut state = BTreeMap::new();
        for table in &self.config.snapshot_tables {
            let rows = self
                .base
                .rows_by_ids(table, &self.config.demo_record_ids)
                .await?;
            state.insert(table.clone(), rows);
        }
        Ok(state)
    }

    /// Seed one SNAPSHOT operation per captured row. Sequences come from
    /// the same atomic append primitive as live writes.
    async fn seed_snapshot(
        &self,
        sandbox_id: &str,
        state: &BTreeMap<String, Vec<RecordData>>,
    ) -> Result<()> {
        for (table, rows) in state {
            for row in rows {
                let Some(record_id) = row_id(row) else {
                    tracing::warn!(table = %table, "Snapshot row without identity skipped");
                    continue;
                };
                self.storage
                    .append(NewOperation::new(
                        sandbox_id,
                        table.as_str(),
                        record_id,
                        Operation::Snapshot,
                        row.clone(),
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    /// Seed one AUTH operation for the demo credential's backing row, when
    /// that row exists.
    async fn seed_auth(&self, sandbox_id: &str) -> Result<()> {
        let email = &self.config.demo_credentials.email;
        let row = self
            .base
            .row_by_field(
                &self.config.auth_table,
                "email",
                &Value::String(email.clone()),
            )
            .await?;

        if let Some(row) = row {
            let Some(record_id) = row_id(&row) else {
                tracing::warn!("Demo credential row has no identity; auth seed skipped");
                return Ok(());
            };
            self.storage
                .append(NewOperation::new(
                    sandbox_id,
                    self.config.auth_table.as_str(),
                    record_id,
                    Operation::Auth,
                    row,
                ))
                .await?;
        }
        Ok(())
    }

    /// Delete all operation records owned by the sandbox, then the session
    /// row. Idempotent; a crash in between leaves at worst a session with
    /// an empty log, which resolves as expired/empty.
    pub async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        let removed = self.storage.delete_sandbox(sandbox_id).await?;
        self.sessions.delete(sandbox_id).await?;
        tracing::info!(sandbox = %sandbox_id, removed_operations = removed, "Destroyed sandbox session");
        Ok(())
    }

    /// Destroy every expired session, each as an independent unit of work.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = clock::now_unix();
        let expired = self.sessions.expired_ids(now).await?;

        let mut report = SweepReport::default();
        for sandbox_id in expired {
            match self.destroy(&sandbox_id).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        session = %sandbox_id,
                        error = %e,
                        "Failed to clean up expired session"
                    );
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxer_core::traits::OperationStore;
    use sandboxer_store::{InMemoryBaseSource, InMemoryStore};
    use serde_json::json;

    fn record_data(value: serde_json::Value) -> RecordData {
        serde_json::from_value(value).unwrap()
    }

    fn registry_with(config: SandboxConfig) -> (Arc<SessionRegistry>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(OverlayStorage::new(store.clone()));
        let base = Arc::new(InMemoryBaseSource::new().with_table(
            "users",
            vec![record_data(
                json!({"id": 1, "email": "admin@admin.com", "name": "Demo"}),
            )],
        ));
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(config),
            store.clone(),
            storage,
            base,
        ));
        (registry, store)
    }

    fn enabled_config() -> SandboxConfig {
        SandboxConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_engine_never_activates() {
        let (registry, _) = registry_with(SandboxConfig::default());
        let ctx = registry
            .resolve_or_create(&RequestContext::new("/demo"))
            .await
            .unwrap();
        assert!(!ctx.is_active());
    }

    #[tokio::test]
    async fn activation_matches_parameters_paths_and_tokens() {
        let (registry, _) = registry_with(enabled_config());

        let by_param = RequestContext::new("/home").with_query("sandbox", "1");
        assert!(registry.resolve_or_create(&by_param).await.unwrap().is_active());

        let by_path = RequestContext::new("/demo/dashboard");
        assert!(registry.resolve_or_create(&by_path).await.unwrap().is_active());

        let by_token = RequestContext::new("/home").with_token("some-token");
        assert!(registry.resolve_or_create(&by_token).await.unwrap().is_active());

        let plain = RequestContext::new("/home").with_query("sandbox", "0");
        assert!(!registry.resolve_or_create(&plain).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn creation_seeds_snapshot_and_auth() {
        let (registry, store) = registry_with(enabled_config());

        let ctx = registry
            .resolve_or_create(&RequestContext::new("/demo"))
            .await
            .unwrap();
        assert!(ctx.newly_created());
        let sandbox_id = ctx.sandbox_id().unwrap();

        let records = store.records_for_table(sandbox_id, "users").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, Operation::Snapshot);
        assert_eq!(records[0].sequence, 0);
        // Same backing row: the auth seed takes the next sequence.
        assert_eq!(records[1].operation, Operation::Auth);
        assert_eq!(records[1].sequence, 1);

        let session = store.find_by_id(sandbox_id).await.unwrap().unwrap();
        assert_eq!(session.initial_state["users"].len(), 1);
        assert_eq!(session.token.len(), ids::SESSION_TOKEN_LEN);
    }

    #[tokio::test]
    async fn valid_tokens_resolve_to_the_same_session() {
        let (registry, _) = registry_with(enabled_config());

        let first = registry
            .resolve_or_create(&RequestContext::new("/demo"))
            .await
            .unwrap();
        let token = first.token().unwrap().to_string();

        let second = registry
            .resolve_or_create(&RequestContext::new("/home").with_token(token.as_str()))
            .await
            .unwrap();

        assert!(!second.newly_created());
        assert_eq!(second.sandbox_id(), first.sandbox_id());
    }

    #[tokio::test]
    async fn expired_tokens_fall_back_to_a_fresh_session() {
        let (registry, store) = registry_with(enabled_config());

        let stale = SandboxSession {
            id: "old".into(),
            token: "old-token".into(),
            client_address: String::new(),
            client_agent: String::new(),
            expires_at: clock::now_unix() - 10,
            initial_state: BTreeMap::new(),
            metadata: RecordData::new(),
            created_at: clock::now_unix() - 3700,
        };
        store.insert(&stale).await.unwrap();

        let ctx = registry
            .resolve_or_create(&RequestContext::new("/home").with_token("old-token"))
            .await
            .unwrap();

        assert!(ctx.newly_created());
        assert_ne!(ctx.sandbox_id(), Some("old"));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_complete() {
        let (registry, store) = registry_with(enabled_config());

        let ctx = registry
            .resolve_or_create(&RequestContext::new("/demo"))
            .await
            .unwrap();
        let sandbox_id = ctx.sandbox_id().unwrap().to_string();
        assert!(store.operation_count() > 0);

        registry.destroy(&sandbox_id).await.unwrap();
        assert_eq!(store.operation_count(), 0);
        assert!(store.find_by_id(&sandbox_id).await.unwrap().is_none());

        // Destroying a nonexistent id is a no-op.
        registry.destroy(&sandbox_id).await.unwrap();
        registry.destroy("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_sessions() {
        let (registry, store) = registry_with(enabled_config());

        let live = registry
            .resolve_or_create(&RequestContext::new("/demo"))
            .await
            .unwrap();

        let stale = SandboxSession {
            id: "old".into(),
            token: "old-token".into(),
            client_address: String::new(),
            client_agent: String::new(),
            expires_at: clock::now_unix() - 1,
            initial_state: BTreeMap::new(),
            metadata: RecordData::new(),
            created_at: 0,
        };
        store.insert(&stale).await.unwrap();

        let report = registry.sweep_expired().await.unwrap();
        assert_eq!(report, SweepReport { removed: 1, failed: 0 });

        assert!(store.find_by_id("old").await.unwrap().is_none());
        assert!(store
            .find_by_id(live.sandbox_id().unwrap())
            .await
            .unwrap()
            .is_some());
    }
}
