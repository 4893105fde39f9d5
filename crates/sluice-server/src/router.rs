use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sluice_gateway::Gateway;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with every gateway endpoint. Request bodies are
/// capped at the configured `upload.max_body_size`.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let body_limit = usize::try_from(gateway.config().upload.max_body_size).unwrap_or(usize::MAX);
    Router::new()
        .route("/status", get(handler::status))
        .route("/mgmt/accessLevel", get(handler::access_level))
        .route("/mgmt/revoke", post(handler::revoke))
        .route("/fs/bin/*path", get(handler::fetch))
        .route("/fs/raw/*path", get(handler::read_text))
        .route("/fs/ls/*path", get(handler::list))
        .route("/fs/lsR/*path", get(handler::list_recursive))
        .route("/fs/check/*path", get(handler::check))
        .route("/fs/put/*path", post(handler::put))
        .route("/fs/upload/*path", post(handler::upload))
        .route("/up/:file_name", post(handler::upload_by_metadata))
        .route("/seq/up/:file_name", post(handler::packed_upload_by_metadata))
        .route("/fs/seq/upload/*path", post(handler::packed_upload))
        .route("/fs/seq/check/*path", get(handler::packed_check))
        .route("/fs/seq/bin/*path", get(handler::packed_fetch))
        .route("/fs/seq/raw/*path", get(handler::packed_read_text))
        .route("/fs/seq/ls/*path", get(handler::packed_list_keys))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway })
}
