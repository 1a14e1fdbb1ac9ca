/// Transport-level failures talking to the telemetry backend.
/// Classified as fatal (caller must fix something) or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),

    // Operational
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::NotFound(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::Decode(_) => "decode",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 422 => Self::InvalidRequest(body),
            404 => Self::NotFound(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Caller-facing error for every lucid operation.
///
/// `InvalidOperation` marks a violated state-machine contract (double init,
/// out-of-order step or event, bad history index). Calls that merely find
/// nothing active are not errors; they log a warning and do nothing.
#[derive(Debug, thiserror::Error)]
pub enum LucidError {
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("client not initialized; call init first")]
    NotInitialized,

    #[error("prompt resolution failure: {0}")]
    PromptResolution(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("interrupted; active session was finalized")]
    Interrupted,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl LucidError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Lift authentication failures out of the transport layer so init can
    /// surface them as the fatal kind they are.
    pub fn from_init(err: BackendError) -> Self {
        match err {
            BackendError::AuthenticationFailed(msg) => Self::AuthenticationFailure(msg),
            other => Self::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(BackendError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(BackendError::InvalidRequest("bad".into()).is_fatal());
        assert!(BackendError::NotFound("prompt".into()).is_fatal());
        assert!(!BackendError::NetworkError("tcp".into()).is_fatal());
        assert!(!BackendError::ServerError { status: 502, body: String::new() }.is_fatal());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            BackendError::from_status(401, "unauthorized".into()),
            BackendError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            BackendError::from_status(403, "forbidden".into()),
            BackendError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            BackendError::from_status(404, "missing".into()),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            BackendError::from_status(503, "down".into()),
            BackendError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            BackendError::from_status(302, "moved".into()),
            BackendError::InvalidRequest(_)
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BackendError::Decode("x".into()).error_kind(), "decode");
        assert_eq!(
            BackendError::ServerError { status: 500, body: "x".into() }.error_kind(),
            "server_error"
        );
    }

    #[test]
    fn init_lifts_auth_failures() {
        let err = LucidError::from_init(BackendError::AuthenticationFailed("nope".into()));
        assert!(matches!(err, LucidError::AuthenticationFailure(_)));

        let err = LucidError::from_init(BackendError::NetworkError("dns".into()));
        assert!(matches!(err, LucidError::Backend(BackendError::NetworkError(_))));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            LucidError::NotInitialized.to_string(),
            "client not initialized; call init first"
        );
        assert!(LucidError::invalid("previous step must be finished")
            .to_string()
            .contains("previous step must be finished"));
    }
}
