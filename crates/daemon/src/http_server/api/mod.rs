//! Gateway-facing RPC endpoints. Bodies are bincode envelopes.
//!
//! - `POST /REGISTER/{type}/{gateway}/{volume}/{user}`: registration
//! - `GET /FILE/{volume}/{file_hex}/{version}/{write_nonce}`: resolve
//! - `POST /FILE/{volume}`: batched metadata updates
//! - `DELETE /FILE/{volume}/{file_hex}`: delete one entry
//! - `GET /GETATTR/{volume}/{file_hex}/{version}/{write_nonce}`: one entry
//! - `GET /GETCHILD/{volume}/{parent_hex}/{name}`: a child by name
//! - `GET /LISTDIR/{volume}/{dir_hex}?page_id=N`: a page of children
//! - `GET /GETXATTR/{volume}/{file_hex}/{name}`: one extended attribute
//! - `GET /LISTXATTR/{volume}/{file_hex}`: extended attribute names
//! - `GET /CERT/{volume}/manifest.{version}`: cert bundle
//! - `GET /CERT/{volume}/{cert_version}/{type}/{gateway_id}/{cert_id}`: one cert
//!
//! The two CERT routes share their second segment's parameter name, which
//! the router requires for overlapping paths.

use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, MethodRouter};
use axum::Router;

use common::entry::FileId;
use common::signed::Signed;
use common::volume::VolumeId;

use crate::auth::{self, Authenticated};
use crate::error::{Error, Result};
use crate::rpc::{self, Rpc};
use crate::ServiceState;

mod cert;
mod file;
mod query;
mod register;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route(
            "/REGISTER/:gateway_type/:gateway_name/:volume_name/:username",
            only(post(register::handler)),
        )
        .route("/FILE/:volume_id", only(post(file::update_handler)))
        .route("/FILE/:volume_id/:file_id", only(delete(file::delete_handler)))
        .route(
            "/FILE/:volume_id/:file_id/:file_version/:write_nonce",
            only(get(file::resolve_handler)),
        )
        .route(
            "/GETATTR/:volume_id/:file_id/:file_version/:write_nonce",
            only(get(query::getattr_handler)),
        )
        .route(
            "/GETCHILD/:volume_id/:file_id/:name",
            only(get(query::getchild_handler)),
        )
        .route("/LISTDIR/:volume_id/:file_id", only(get(query::listdir_handler)))
        .route(
            "/GETXATTR/:volume_id/:file_id/:name",
            only(get(query::getxattr_handler)),
        )
        .route(
            "/LISTXATTR/:volume_id/:file_id",
            only(get(query::listxattr_handler)),
        )
        .route("/CERT/:volume_id/:segment", only(get(cert::manifest_handler)))
        .route(
            "/CERT/:volume_id/:segment/:gateway_type/:gateway_id/:cert_id",
            only(get(cert::cert_handler)),
        )
        .with_state(state)
}

/// Any method other than the routed one is answered with 501.
fn only(route: MethodRouter<ServiceState>) -> MethodRouter<ServiceState> {
    route.fallback(unsupported_method)
}

async fn unsupported_method() -> Response {
    Error::Unsupported("method not supported on this resource".to_string()).into_response()
}

/// Signed reply as an octet-stream body.
pub(crate) fn wire_response<T: Signed>(reply: &T) -> Result<Response> {
    let body = reply.to_wire().map_err(Error::signing)?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response())
}

/// File ids travel as hex in paths.
pub(crate) fn parse_file_id(raw: &str) -> Result<FileId> {
    FileId::from_str_radix(raw, 16)
        .map_err(|_| Error::malformed(format!("file id {:?} is not hex", raw)))
}

/// Authenticate the request against `volume_id` and check the RPC table.
pub(crate) async fn admit(
    state: &ServiceState,
    rpc: Rpc,
    volume_id: VolumeId,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Authenticated> {
    let header = headers
        .get(header::AUTHORIZATION)
        .map(|v| {
            v.to_str()
                .map_err(|_| Error::malformed("authorization header is not ASCII"))
        })
        .transpose()?;
    let url = uri.path_and_query().map(|p| p.as_str()).unwrap_or(uri.path());

    let authenticated = auth::authenticate(state, volume_id, header, url).await?;
    rpc::authorize(rpc, &authenticated.caller)?;
    Ok(authenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_id() {
        assert_eq!(parse_file_id("0").unwrap(), 0);
        assert_eq!(parse_file_id("FF").unwrap(), 255);
        assert_eq!(parse_file_id("ffffffffffffffff").unwrap(), u64::MAX);
        assert!(matches!(parse_file_id("xyz"), Err(Error::Malformed(_))));
    }
}
