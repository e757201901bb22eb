use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Response type for the liveness endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivezResponse {
    pub status: String,
}

/// Always answers. External health checks use it to tell whether the
/// process is alive; it says nothing about the store or the cache.
#[tracing::instrument]
pub async fn handler() -> Response {
    let msg = LivezResponse {
        status: "ok".to_string(),
    };
    (StatusCode::OK, Json(msg)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_direct() {
        let response = handler().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&body[..], b"{\"status\":\"ok\"}");
    }
}
