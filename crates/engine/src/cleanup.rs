//! Periodic expired-session sweep.

use std::sync::Arc;
use std::time::Duration;

use sandboxer_core::{config::CleanupConfig, Result};

use crate::registry::{SessionRegistry, SweepReport};

/// Background worker that destroys expired sessions on an interval.
///
/// Hosts with their own scheduler can skip `spawn` and call `sweep_once`
/// from whatever drives their periodic jobs.
pub struct CleanupWorker {
    registry: Arc<SessionRegistry>,
    config: CleanupConfig,
}

impl CleanupWorker {
    pub fn new(registry: Arc<SessionRegistry>, config: CleanupConfig) -> Self {
        Self { registry, config }
    }

    /// One sweep over all expired sessions.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.registry.sweep_expired().await
    }

    /// Spawn the sweep loop. Returns `None` when cleanup is disabled; the
    /// task runs until its handle is aborted.
    pub fn spawn(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Sandbox cleanup disabled");
            return None;
        }

        let period = Duration::from_secs(self.config.interval_seconds);
        tracing::info!(interval_seconds = self.config.interval_seconds, "Sandbox cleanup scheduled");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh process
            // does not sweep before it finishes starting up.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.sweep_once().await {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        tracing::info!(
                            removed = report.removed,
                            failed = report.failed,
                            "Sandbox cleanup sweep finished"
                        );
                    }
                    Ok(_) => {
                        tracing::debug!("Sandbox cleanup sweep found nothing to do");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Sandbox cleanup sweep failed");
                    }
                }
            }
        }))
    }
}
