use std::collections::HashMap;

/// The activation-relevant slice of an inbound request.
///
/// The host pipeline builds one of these per request; the engine reads it
/// and never holds onto it past `resolve_or_create`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    pub query: HashMap<String, String>,
    /// Session token presented by the client, if any (e.g. from a cookie).
    pub session_token: Option<String>,
    pub client_address: String,
    pub client_agent: String,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_client(
        mut self,
        address: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        self.client_address = address.into();
        self.client_agent = agent.into();
        self
    }
}
