//! Syndicate metadata service.
//!
//! Gateways register against a volume, then authenticate every RPC with a
//! session MAC. Entry metadata lives in a [`metadata_store::Store`] behind
//! a volatile cache; directory aggregates are spread over shards so many
//! writers can add children to one directory without contending.

pub mod admin;
pub mod auth;
pub mod cache_layer;
pub mod catalog;
pub mod certs;
pub mod entry_store;
pub mod error;
pub mod fanout;
pub mod http_server;
pub mod logging;
pub mod queries;
pub mod register;
pub mod resolve;
pub mod rpc;
pub mod service_config;
pub mod service_state;
pub mod sharding;
pub mod updates;

// App state (configuration, paths)
pub mod state;

pub use error::{Error, Result};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
pub use state::{AppState, StateError};

/// Build info of the daemon crate rather than of `common`.
pub fn build_info() -> common::version::BuildInfo {
    common::build_info!()
}
