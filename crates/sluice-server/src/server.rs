use std::net::SocketAddr;
use std::sync::Arc;

use sluice_gateway::Gateway;
use tokio::net::TcpListener;

use crate::error::ServerResult;
use crate::router::build_router;

/// Sluice HTTP server.
pub struct SluiceServer {
    gateway: Arc<Gateway>,
}

impl SluiceServer {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.gateway.config().server.bind_addr
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(Arc::clone(&self.gateway))
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let addr = self.bind_addr();
        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "sluice server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
