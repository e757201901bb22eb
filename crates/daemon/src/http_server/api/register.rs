use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::Result;
use crate::register::{self, RegisterTarget};
use crate::ServiceState;

use super::wire_response;

#[tracing::instrument(skip(state, body))]
pub async fn handler(
    State(state): State<ServiceState>,
    Path((gateway_type, gateway_name, volume_name, username)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Result<Response> {
    let target = RegisterTarget {
        gateway_type,
        gateway_name,
        volume_name,
        username,
    };
    let reply = register::register(&state, &target, &body).await?;
    wire_response(&reply)
}
