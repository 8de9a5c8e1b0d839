#![deny(unused)]
//! The overlay engine for Sandboxer.
//!
//! Wires the storage backends into the per-request machinery: the session
//! registry resolves a sandbox scope from an inbound request, the write
//! interceptor diverts mutations into the operation log, the overlay
//! resolver replays the log over base rows, and the cleanup worker sweeps
//! expired sessions.
//!
//! ```text
//! request ──▶ SessionRegistry ──▶ SandboxContext
//!                                      │
//!                 writes ──▶ WriteInterceptor ──▶ OverlayStorage ──▶ log
//!                 reads  ──▶ OverlayResolver  ◀── cache ◀──────────┘
//! ```

pub mod auth;
pub mod cleanup;
pub mod interceptor;
pub mod overlay;
pub mod registry;
pub mod storage;
pub mod telemetry;

pub use auth::DemoLogin;
pub use cleanup::CleanupWorker;
pub use interceptor::{MutationIntent, ReadDecision, WriteDecision, WriteInterceptor};
pub use overlay::{Conditions, OverlayResolver};
pub use registry::{SessionRegistry, SweepReport};
pub use storage::OverlayStorage;
pub use telemetry::configure_tracing;
