#![deny(unused)]
//! # Sandboxer
//!
//! Copy-on-write demo sandboxes over a shared dataset. Each sandboxed
//! visitor gets an isolated overlay: every write they attempt is diverted
//! into a per-session operation log and replayed over the real data on
//! reads, until the session expires. The shared dataset is never touched.
//!
//! The host application owns the request pipeline, the cookie transport,
//! and the data-access hook point; this crate owns everything behind them.
//!
//! ```ignore
//! use sandboxer::{Sandboxer, SqliteStore};
//! use sandboxer::config::SandboxConfig;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open("sandbox.db")?);
//! let engine = Sandboxer::builder(SandboxConfig::load()?)
//!     .with_operation_store(store.clone())
//!     .with_session_store(store)
//!     .with_base_source(my_base_source)
//!     .build()?;
//!
//! // Per request:
//! let ctx = engine.registry().resolve_or_create(&request).await?;
//! let decision = engine.interceptor().before_write(&ctx, "posts", None, intent, None).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

pub use sandboxer_core::{clock, config, ids, traits, types, Error, Result};
pub use sandboxer_engine::{
    configure_tracing, CleanupWorker, Conditions, DemoLogin, MutationIntent, OverlayResolver,
    OverlayStorage, ReadDecision, SessionRegistry, SweepReport, WriteDecision, WriteInterceptor,
};
pub use sandboxer_store::{
    InMemoryBaseSource, InMemoryOperationCache, InMemoryStore, RedisOperationCache, SqliteStore,
};

use sandboxer_core::config::SandboxConfig;
use sandboxer_core::traits::{BaseSource, OperationCache, OperationStore, SessionStore};

/// The assembled engine: one of these per backing store.
///
/// All parts share one storage service, so the interceptor's writes are
/// immediately visible to the resolver and the registry's destroy drops
/// the same cache entries the reads go through.
pub struct Sandboxer {
    config: Arc<SandboxConfig>,
    registry: Arc<SessionRegistry>,
    interceptor: Arc<WriteInterceptor>,
    resolver: Arc<OverlayResolver>,
    demo_login: Arc<DemoLogin>,
    cleanup: Arc<CleanupWorker>,
}

impl Sandboxer {
    pub fn builder(config: SandboxConfig) -> SandboxerBuilder {
        SandboxerBuilder {
            config,
            operations: None,
            sessions: None,
            cache: None,
            base: None,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn interceptor(&self) -> &WriteInterceptor {
        &self.interceptor
    }

    pub fn resolver(&self) -> &OverlayResolver {
        &self.resolver
    }

    pub fn demo_login(&self) -> &DemoLogin {
        &self.demo_login
    }

    pub fn cleanup(&self) -> &CleanupWorker {
        &self.cleanup
    }

    /// Spawn the periodic cleanup loop, if enabled in configuration.
    pub fn start_cleanup(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.cleanup.clone().spawn()
    }
}

/// Wires configuration and backends into a [`Sandboxer`].
pub struct SandboxerBuilder {
    config: SandboxConfig,
    operations: Option<Arc<dyn OperationStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    cache: Option<Arc<dyn OperationCache>>,
    base: Option<Arc<dyn BaseSource>>,
}

impl SandboxerBuilder {
    pub fn with_operation_store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.operations = Some(store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Override the cache backend. Without an override a process-local
    /// cache is built from the cache configuration.
    pub fn with_cache(mut self, cache: Arc<dyn OperationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_base_source(mut self, base: Arc<dyn BaseSource>) -> Self {
        self.base = Some(base);
        self
    }

    /// Validate the configuration and assemble the engine. Configuration
    /// problems are fatal here, never per-request.
    pub fn build(self) -> Result<Sandboxer> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let operations = self
            .operations
            .ok_or_else(|| Error::configuration("an operation store is required"))?;
        let sessions = self
            .sessions
            .ok_or_else(|| Error::configuration("a session store is required"))?;
        let base = self
            .base
            .ok_or_else(|| Error::configuration("a base source is required"))?;

        let mut storage = OverlayStorage::new(operations);
        if config.cache.enabled {
            let cache = self.cache.unwrap_or_else(|| {
                Arc::new(InMemoryOperationCache::new(
                    config.cache.prefix.clone(),
                    Duration::from_secs(config.cache.ttl_seconds),
                ))
            });
            storage = storage.with_cache(cache);
        }
        let storage = Arc::new(storage);

        let registry = Arc::new(SessionRegistry::new(
            config.clone(),
            sessions,
            storage.clone(),
            base.clone(),
        ));
        let interceptor = Arc::new(WriteInterceptor::new(
            storage.clone(),
            config.excluded_tables.clone(),
        ));
        let resolver = Arc::new(OverlayResolver::new(
            storage,
            config.excluded_tables.clone(),
        ));
        let demo_login = Arc::new(DemoLogin::new(config.clone(), base));
        let cleanup = Arc::new(CleanupWorker::new(registry.clone(), config.cleanup.clone()));

        tracing::info!(
            enabled = config.enabled,
            cache = config.cache.enabled,
            ttl_seconds = config.ttl_seconds,
            "Sandbox engine assembled"
        );

        Ok(Sandboxer {
            config,
            registry,
            interceptor,
            resolver,
            demo_login,
            cleanup,
        })
    }
}
