use secrecy::{ExposeSecret, SecretString};

/// Wraps the backend API key with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Api-Key {}", self.0.expose_secret())
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Environment variable names consulted when a value is not passed explicitly.
pub mod env_vars {
    pub const API_KEY: &str = "LUCIDIC_API_KEY";
    pub const AGENT_ID: &str = "LUCIDIC_AGENT_ID";
    pub const BASE_URL: &str = "LUCIDIC_BASE_URL";
    pub const PROVIDER: &str = "LUCIDIC_PROVIDER";
}
