//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::gatehouse::v1::admission_service_server::AdmissionServiceServer;
use super::service::AdmissionServiceImpl;
use crate::admission::AdmissionController;
use crate::error::{GatehouseError, Result};

/// gRPC server for the admission service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared admission controller
    controller: Arc<AdmissionController>,
}

impl GrpcServer {
    /// Create a new gRPC server around a shared controller.
    pub fn new(addr: SocketAddr, controller: Arc<AdmissionController>) -> Self {
        Self { addr, controller }
    }

    /// Address the server binds to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = AdmissionServiceImpl::new(self.controller);

        info!(addr = %self.addr, "Starting gRPC server for AdmissionService");

        Server::builder()
            .add_service(AdmissionServiceServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                GatehouseError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let controller = Arc::new(AdmissionController::default());
        let server = GrpcServer::new(addr, controller);
        assert_eq!(server.addr(), addr);
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let controller = Arc::new(AdmissionController::default());
        let server = GrpcServer::new(addr, controller);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve_with_shutdown(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("server should stop after the signal");
        assert!(result.is_ok());
    }
}
