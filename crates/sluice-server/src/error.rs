use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sluice_gateway::GatewayError;
use thiserror::Error;
use tracing::error;

/// Status for requests the caller can fix: bad names, bad metadata, busy or
/// duplicate artifacts. Not a registered code; existing clients key on it.
pub const CLIENT_ERROR: u16 = 499;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Malformed request: missing header or query parameter, invalid JSON.
    #[error("{0}")]
    BadRequest(String),

    #[error("blocking task failed: {0}")]
    Join(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Gateway(GatewayError::Client(_)) | Self::BadRequest(_) => client_error_status(),
            Self::Gateway(GatewayError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Gateway(GatewayError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Self::Gateway(GatewayError::Server(_)) | Self::Join(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn client_error_status() -> StatusCode {
    StatusCode::from_u16(CLIENT_ERROR).unwrap_or(StatusCode::BAD_REQUEST)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Gateway(GatewayError::Server(fault)) => fault.to_string(),
            Self::Join(_) | Self::Io(_) => {
                let fault = sluice_gateway::ServerFault::logged("transport", &self);
                fault.to_string()
            }
            Self::Gateway(GatewayError::Unauthorized) => {
                "Invalid API token or insufficient access!".to_string()
            }
            other => other.to_string(),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), "request failed");
        }
        (status, body).into_response()
    }
}
