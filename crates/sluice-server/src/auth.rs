use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde_json::Value;
use sluice_gateway::metadata;

use crate::error::ServerError;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the JSON upload metadata.
pub const META_HEADER: &str = "x-meta";

/// The presented API key. A missing header is an empty credential, which the
/// gateway rejects as unauthorized.
#[derive(Clone, Debug)]
pub struct Credential(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Credential {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = match parts.headers.get(API_KEY_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| ServerError::BadRequest("X-API-KEY is not valid text".into()))?
                .to_string(),
            None => String::new(),
        };
        Ok(Self(key))
    }
}

/// Upload metadata from the `X-META` header, parsed as a JSON object.
#[derive(Clone, Debug)]
pub struct Metadata(pub Value);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Metadata {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(META_HEADER)
            .ok_or_else(|| ServerError::BadRequest("missing X-META header".into()))?
            .to_str()
            .map_err(|_| ServerError::BadRequest("X-META is not valid text".into()))?;
        let value = metadata::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))?;
        Ok(Self(value))
    }
}
