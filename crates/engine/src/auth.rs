//! Demo credential handling inside a sandbox.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde_json::Value;

use sandboxer_core::{
    config::SandboxConfig,
    traits::BaseSource,
    types::{RecordData, SandboxContext},
    Result,
};

/// Resolves the configured demo credentials to their backing row so the
/// host can establish its own authenticated session.
pub struct DemoLogin {
    config: Arc<SandboxConfig>,
    base: Arc<dyn BaseSource>,
}

impl DemoLogin {
    pub fn new(config: Arc<SandboxConfig>, base: Arc<dyn BaseSource>) -> Self {
        Self { config, base }
    }

    /// Returns the demo user's row when the sandbox is active and the
    /// presented pair matches the configured credentials; `None` lets the
    /// host's normal authentication take over.
    pub async fn handle_demo_login(
        &self,
        ctx: &SandboxContext,
        email: &str,
        password: &str,
    ) -> Result<Option<RecordData>> {
        if !ctx.is_active() {
            return Ok(None);
        }

        let credentials = &self.config.demo_credentials;
        if email != credentials.email || password != credentials.password.expose_secret() {
            return Ok(None);
        }

        self.base
            .row_by_field(
                &self.config.auth_table,
                "email",
                &Value::String(credentials.email.clone()),
            )
            .await
    }
}
