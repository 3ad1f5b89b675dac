//! gRPC boundary between the web layer and the admission controller.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::AdmissionServiceImpl;

// Include the generated protobuf code
pub mod proto {
    pub mod gatehouse {
        pub mod v1 {
            tonic::include_proto!("gatehouse.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::gatehouse::v1::{
    admission_service_server::AdmissionServiceServer, AdmitRequest, AdmitResponse,
    RecordLoginRequest, RecordLoginResponse,
};
