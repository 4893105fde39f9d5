//! Route handlers. Each one extracts the request, runs the gateway call on
//! the blocking pool and shapes the response.

use std::io::{self, Cursor, ErrorKind, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde::Deserialize;
use sluice_gateway::{CheckReport, Gateway, GatewayResult, UploadReceipt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::auth::{Credential, Metadata};
use crate::error::{ServerError, ServerResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// `?fileName=` selecting a record inside a packed container.
#[derive(Debug, Deserialize)]
pub struct RecordQuery {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
}

impl RecordQuery {
    fn key(self) -> ServerResult<String> {
        self.file_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ServerError::BadRequest("missing fileName query parameter".into()))
    }
}

/// Run a gateway call on the blocking pool; store and ledger I/O is
/// synchronous.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> GatewayResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(e) => Err(ServerError::Join(e.to_string())),
    }
}

/// Chunks buffered between the reading thread and the response body.
const STREAM_DEPTH: usize = 4;

/// Stream `handle` to the client in `chunk_size` pieces.
///
/// The handle is read on the blocking pool and handed over through a bounded
/// channel, so at most `STREAM_DEPTH` chunks sit in memory. A read error
/// after the headers went out aborts the body.
fn octet_stream(mut handle: Box<dyn Read + Send>, chunk_size: usize) -> Response {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(STREAM_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        loop {
            let item = match handle.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&chunk[..n])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "read failed while streaming a response");
                    Err(e)
                }
            };
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() {
                debug!("client went away while streaming a response");
                break;
            }
            if failed {
                break;
            }
        }
    });
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

// -- Management ---------------------------------------------------------------

pub async fn status() -> &'static str {
    "RUNNING"
}

pub async fn access_level(State(state): State<AppState>, Credential(key): Credential) -> ServerResult<String> {
    blocking(move || Ok(state.gateway.access_level(&key).bits().to_string())).await
}

pub async fn revoke(State(state): State<AppState>, Credential(key): Credential) -> ServerResult<&'static str> {
    blocking(move || state.gateway.revoke(&key)).await?;
    Ok("OK")
}

// -- Plain files --------------------------------------------------------------

pub async fn fetch(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<Response> {
    let chunk_size = state.gateway.config().chunk_size;
    let handle = blocking(move || state.gateway.fetch(&key, &path)).await?;
    Ok(octet_stream(handle, chunk_size))
}

pub async fn read_text(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<String> {
    blocking(move || state.gateway.read_text(&key, &path)).await
}

pub async fn list(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<Json<Vec<String>>> {
    blocking(move || state.gateway.list(&key, &path)).await.map(Json)
}

pub async fn list_recursive(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<Json<Vec<String>>> {
    blocking(move || state.gateway.list_recursive(&key, &path))
        .await
        .map(Json)
}

pub async fn check(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<Json<CheckReport>> {
    blocking(move || state.gateway.check(&key, &path)).await.map(Json)
}

pub async fn put(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    body: Bytes,
) -> ServerResult<Json<UploadReceipt>> {
    blocking(move || state.gateway.put(&key, &path, Cursor::new(body)))
        .await
        .map(Json)
}

pub async fn upload(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    Metadata(meta): Metadata,
    body: Bytes,
) -> ServerResult<Json<UploadReceipt>> {
    blocking(move || state.gateway.upload(&key, &path, meta, Cursor::new(body)))
        .await
        .map(Json)
}

/// Responds with the bare hex digest.
pub async fn upload_by_metadata(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(file_name): Path<String>,
    Metadata(meta): Metadata,
    body: Bytes,
) -> ServerResult<String> {
    let receipt = blocking(move || {
        state
            .gateway
            .upload_by_metadata(&key, &file_name, meta, Cursor::new(body))
    })
    .await?;
    Ok(receipt.digest.to_hex())
}

// -- Packed containers --------------------------------------------------------

/// Responds with the bare hex digest.
pub async fn packed_upload_by_metadata(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(file_name): Path<String>,
    Metadata(meta): Metadata,
    body: Bytes,
) -> ServerResult<String> {
    let receipt = blocking(move || {
        state
            .gateway
            .packed_upload_by_metadata(&key, &file_name, meta, Cursor::new(body))
    })
    .await?;
    Ok(receipt.digest.to_hex())
}

pub async fn packed_upload(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    Query(query): Query<RecordQuery>,
    Metadata(meta): Metadata,
    body: Bytes,
) -> ServerResult<Json<UploadReceipt>> {
    let record = query.key()?;
    blocking(move || {
        state
            .gateway
            .packed_upload(&key, &path, &record, meta, Cursor::new(body))
    })
    .await
    .map(Json)
}

pub async fn packed_check(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    Query(query): Query<RecordQuery>,
) -> ServerResult<Json<CheckReport>> {
    let record = query.key()?;
    blocking(move || state.gateway.packed_check(&key, &path, &record))
        .await
        .map(Json)
}

pub async fn packed_fetch(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    Query(query): Query<RecordQuery>,
) -> ServerResult<Response> {
    let record = query.key()?;
    let chunk_size = state.gateway.config().chunk_size;
    // A record is a single compressed frame, so it is decoded whole.
    let bytes = blocking(move || state.gateway.packed_lookup(&key, &path, &record)).await?;
    Ok(octet_stream(Box::new(Cursor::new(bytes)), chunk_size))
}

pub async fn packed_read_text(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
    Query(query): Query<RecordQuery>,
) -> ServerResult<String> {
    let record = query.key()?;
    blocking(move || state.gateway.packed_read_text(&key, &path, &record)).await
}

pub async fn packed_list_keys(
    State(state): State<AppState>,
    Credential(key): Credential,
    Path(path): Path<String>,
) -> ServerResult<Json<Vec<String>>> {
    blocking(move || state.gateway.packed_list_keys(&key, &path))
        .await
        .map(Json)
}
