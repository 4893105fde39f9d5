//! HTTP transport for the Sluice upload gateway.
//!
//! Maps the gateway's operations onto routes. Credentials arrive in
//! `X-API-KEY`, upload metadata in `X-META`. Caller mistakes answer 499,
//! missing artifacts 404, bad credentials 401 and everything else an opaque
//! 500.

pub mod auth;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use auth::{Credential, Metadata, API_KEY_HEADER, META_HEADER};
pub use error::{ServerError, ServerResult, CLIENT_ERROR};
pub use handler::AppState;
pub use router::build_router;
pub use server::SluiceServer;
