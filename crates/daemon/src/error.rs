//! Service-wide error taxonomy and its HTTP mapping.

use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};

use common::messages::ReplyError;
use common::signed::EnvelopeError;
use metadata_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unparseable envelope, path or header. Never partially processed.
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("missing or invalid credential: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Business-level outcome of an entry operation. Batched callers get
    /// this inside the signed reply; single-shot callers get its status.
    #[error("rejected: {0:?}")]
    Rejected(ReplyError),

    /// A fan-out did not complete in time. The whole RPC fails.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn malformed(e: impl std::fmt::Display) -> Self {
        Error::Malformed(e.to_string())
    }

    /// Retryable failure that belongs to the backend, not the request.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Malformed(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Rejected(code) => match code {
                ReplyError::NotFound => StatusCode::NOT_FOUND,
                ReplyError::PermissionDenied | ReplyError::NotCoordinator => {
                    StatusCode::FORBIDDEN
                }
                ReplyError::AlreadyExists | ReplyError::NotEmpty | ReplyError::StaleVersion => {
                    StatusCode::CONFLICT
                }
                ReplyError::Invalid => StatusCode::BAD_REQUEST,
            },
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Split a business rejection, which belongs in a signed reply, from
    /// a failure of the whole request.
    pub fn rejection<T>(result: Result<T>) -> Result<std::result::Result<T, ReplyError>> {
        match result {
            Ok(value) => Ok(Ok(value)),
            Err(Error::Rejected(code)) => Ok(Err(code)),
            Err(e) => Err(e),
        }
    }

    /// Re-sign or re-encode failure on our own data.
    pub(crate) fn signing(e: EnvelopeError) -> Self {
        Error::Internal(format!("failed to sign reply: {}", e))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        if self.is_transient() {
            return (
                status,
                [(header::RETRY_AFTER, "1")],
                "service temporarily unavailable, retry",
            )
                .into_response();
        }

        let body = match &self {
            // Backend detail stays in the log.
            Error::Internal(_) | Error::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::Malformed("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Unsupported("x".into()).status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            Error::Rejected(ReplyError::NotEmpty).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::Timeout("shards").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Store(StoreError::Unavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rejection_split() {
        assert_eq!(Error::rejection(Ok::<_, Error>(1)).unwrap(), Ok(1));
        assert_eq!(
            Error::rejection::<()>(Err(Error::Rejected(ReplyError::NotFound))).unwrap(),
            Err(ReplyError::NotFound)
        );
        assert!(Error::rejection::<()>(Err(Error::Timeout("x"))).is_err());
    }

    #[tokio::test]
    async fn test_transient_response_has_retry_after() {
        let response = Error::Timeout("auth").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
