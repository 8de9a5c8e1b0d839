use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::RecordData;

/// A sandbox session: the isolation scope one visitor's writes live in.
///
/// Never mutated after creation except implicitly through its owned
/// operation records. A session whose `expires_at` has passed is logically
/// nonexistent regardless of whether its row still exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    /// Primary key.
    pub id: String,
    /// Opaque token handed to the client; the only external handle.
    pub token: String,
    /// Provenance, informational only.
    pub client_address: String,
    /// Provenance, informational only.
    pub client_agent: String,
    /// Absolute unix timestamp (seconds).
    pub expires_at: i64,
    /// Immutable snapshot captured once at creation: table name to rows.
    pub initial_state: BTreeMap<String, Vec<RecordData>>,
    /// Free-form, opaque to the engine.
    pub metadata: RecordData,
    pub created_at: i64,
}

impl SandboxSession {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Explicit per-request sandbox scope.
///
/// Passed into every engine operation instead of consulting process-global
/// state, so concurrent requests cannot observe each other's scope.
#[derive(Debug, Clone)]
pub struct SandboxContext {
    sandbox_id: Option<String>,
    token: Option<String>,
    newly_created: bool,
}

impl SandboxContext {
    /// Context for a request with no sandbox in scope.
    pub fn inactive() -> Self {
        Self {
            sandbox_id: None,
            token: None,
            newly_created: false,
        }
    }

    /// Context bound to a resolved session.
    pub fn active(sandbox_id: impl Into<String>, token: impl Into<String>, newly_created: bool) -> Self {
        Self {
            sandbox_id: Some(sandbox_id.into()),
            token: Some(token.into()),
            newly_created,
        }
    }

    pub fn is_active(&self) -> bool {
        self.sandbox_id.is_some()
    }

    pub fn sandbox_id(&self) -> Option<&str> {
        self.sandbox_id.as_deref()
    }

    /// Token the caller must deliver to the client when `newly_created`.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn newly_created(&self) -> bool {
        self.newly_created
    }
}
