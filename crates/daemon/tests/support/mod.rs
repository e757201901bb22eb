//! Shared fixture: one user, one volume and one registered client gateway,
//! driven through the real router.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use tower::ServiceExt;

use common::caps::Capabilities;
use common::crypto::{SecretKey, SessionKey};
use common::gateway::{Gateway, GatewayType};
use common::messages::RegisterRequest;
use common::messages::RegistrationMetadata;
use common::signed::Signed;
use common::user::User;
use common::volume::Volume;
use metadata_store::{MemoryStore, MokaCache};
use syndicate_ms::admin::{self, NewGateway, NewVolume};
use syndicate_ms::auth::GatewayToken;
use syndicate_ms::http_server;
use syndicate_ms::{ServiceConfig, ServiceState};

pub const USERNAME: &str = "alice";
pub const VOLUME_NAME: &str = "vol";
pub const GATEWAY_NAME: &str = "ug-1";

pub struct Fixture {
    pub store: MemoryStore,
    pub state: ServiceState,
    pub router: Router,
    pub user_key: SecretKey,
    pub user: User,
    pub volume: Volume,
    pub gateway: Gateway,
    pub gateway_key: SecretKey,
    pub registration: RegistrationMetadata,
}

pub struct Options {
    pub allow_anon: bool,
    pub config: ServiceConfig,
    pub caps: Capabilities,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            allow_anon: false,
            config: ServiceConfig::default(),
            caps: Capabilities::all(),
        }
    }
}

pub async fn setup() -> Fixture {
    setup_with(Options::default()).await
}

pub async fn setup_with(options: Options) -> Fixture {
    let store = MemoryStore::new();
    let cache = MokaCache::new(options.config.cache_config());
    let state = ServiceState::new(Arc::new(store.clone()), Arc::new(cache), options.config);

    let user_key = SecretKey::generate();
    let user = admin::create_user(&state, USERNAME, user_key.public(), false)
        .await
        .unwrap();
    let volume = admin::create_volume(
        &state,
        &user,
        NewVolume {
            name: VOLUME_NAME.to_string(),
            description: "test volume".to_string(),
            allow_anon: options.allow_anon,
            num_shards: None,
        },
    )
    .await
    .unwrap();
    let gateway_key = SecretKey::generate();
    admin::create_gateway(
        &state,
        &user,
        NewGateway {
            volume_id: volume.volume_id,
            owner_id: user.owner_id,
            name: GATEWAY_NAME.to_string(),
            gateway_type: GatewayType::User,
            public_key: gateway_key.public(),
            caps: options.caps,
            sealed_private_key: Some(b"sealed".to_vec()),
        },
    )
    .await
    .unwrap();

    let router = http_server::router(state.clone());
    let response = send(&router, register_request(&user_key, GATEWAY_NAME)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let registration = RegistrationMetadata::from_wire(&body(response).await).unwrap();

    let catalog = state.catalog();
    let volume = catalog.volume(volume.volume_id).await.unwrap().unwrap();
    let gateway = catalog.gateway_by_name(GATEWAY_NAME).await.unwrap().unwrap();

    Fixture {
        store,
        state,
        router,
        user_key,
        user,
        volume,
        gateway,
        gateway_key,
        registration,
    }
}

pub fn register_request(user_key: &SecretKey, gateway_name: &str) -> Request<Body> {
    let envelope = RegisterRequest {
        gateway_type: GatewayType::User,
        gateway_name: gateway_name.to_string(),
        volume_name: VOLUME_NAME.to_string(),
        username: USERNAME.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        signature: Vec::new(),
    }
    .signed_with(user_key)
    .unwrap();
    Request::builder()
        .method(Method::POST)
        .uri(format!("/REGISTER/UG/{}/{}/{}", gateway_name, VOLUME_NAME, USERNAME))
        .body(Body::from(envelope.to_wire().unwrap()))
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

impl Fixture {
    pub fn session(&self) -> &SessionKey {
        &self.registration.session_password
    }

    /// A request carrying a valid session MAC for `uri`.
    pub fn signed(&self, method: Method, uri: &str, payload: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::AUTHORIZATION,
                GatewayToken::header_for(&self.gateway, self.session(), uri),
            )
            .body(Body::from(payload))
            .unwrap()
    }

    pub fn anonymous(&self, method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    pub fn resolve_uri(&self, file_id: u64, version: i64, nonce: i64) -> String {
        format!(
            "/FILE/{}/{:X}/{}/{}",
            self.volume.volume_id, file_id, version, nonce
        )
    }
}
