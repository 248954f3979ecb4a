use axum::response::IntoResponse;
use http::StatusCode;

/// Internal error taxonomy (spec S7). Every variant maps to HTTP 500 on the wire; the
/// taxonomy exists for logging and for building a precise `{error:{message}}` body, not
/// for status-code discrimination.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),
    #[error("No credentials configured for provider: {0}")]
    NoCredentials(String),
    #[error("Unsupported provider: {0}")]
    UnknownProvider(String),
    #[error("Auth refresh failed: {0}")]
    AuthRefreshFailed(String),
    #[error("Upstream rejected request (status={status}): {body_excerpt}")]
    UpstreamRejected { status: u16, body_excerpt: String },
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("Upstream timed out")]
    Timeout,
    #[error("Subprocess failed (code={code:?}): {stderr_excerpt}")]
    SubprocessFailed {
        code: Option<i32>,
        stderr_excerpt: String,
    },
    #[error("Protocol parse failed: {0}")]
    ProtocolParseFailed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// All user-visible failures surface as HTTP 500, per spec S7: "All other
    /// user-visible failures return HTTP 500 `{error:{message}}`."
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    #[must_use]
    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": { "message": self.to_string() } })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.http_status(), axum::Json(self.error_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_message_matches_scenario_5() {
        let err = GatewayError::UnknownProvider("nope".to_string());
        assert_eq!(err.to_string(), "Unsupported provider: nope");
    }

    #[test]
    fn no_credentials_message_mentions_provider_id() {
        let err = GatewayError::NoCredentials("openai".to_string());
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn every_variant_maps_to_http_500() {
        let variants = vec![
            GatewayError::BadRequest("x".into()),
            GatewayError::NoCredentials("x".into()),
            GatewayError::UnknownProvider("x".into()),
            GatewayError::AuthRefreshFailed("x".into()),
            GatewayError::UpstreamRejected {
                status: 429,
                body_excerpt: "x".into(),
            },
            GatewayError::UpstreamUnreachable("x".into()),
            GatewayError::Timeout,
            GatewayError::SubprocessFailed {
                code: Some(1),
                stderr_excerpt: "x".into(),
            },
            GatewayError::ProtocolParseFailed("x".into()),
            GatewayError::Internal("x".into()),
        ];
        for err in variants {
            assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn error_body_shape_matches_spec() {
        let err = GatewayError::UnknownProvider("nope".to_string());
        let body = err.error_body();
        assert_eq!(
            body["error"]["message"],
            serde_json::json!("Unsupported provider: nope")
        );
    }
}
