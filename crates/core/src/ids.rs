//! Identifier and token generation.

use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

/// Length of the opaque session token handed to clients.
/// 64 alphanumeric characters carry well over 256 bits of entropy.
pub const SESSION_TOKEN_LEN: usize = 64;

/// Fresh unique id for sessions and operation records.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Record id assigned to a sandboxed INSERT that arrived without one.
pub fn generated_record_id() -> String {
    format!("sandbox_{}", Uuid::new_v4())
}

/// Opaque session token.
pub fn new_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}
