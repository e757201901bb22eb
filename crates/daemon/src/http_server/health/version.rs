use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use crate::build_info;

#[tracing::instrument]
pub async fn handler() -> Response {
    (StatusCode::OK, Json(build_info())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::version::BuildInfo;

    #[tokio::test]
    async fn test_handler_direct() {
        let response = handler().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let info: BuildInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.name, "syndicate-ms");
    }
}
