//! Admission service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::gatehouse::v1::{
    admission_service_server::AdmissionService, identity::Kind, ActionKind as ProtoActionKind,
    AdmitRequest, AdmitResponse, Identity as ProtoIdentity, LockState as ProtoLockState,
    RecordLoginRequest, RecordLoginResponse,
};
use crate::admission::{
    ActionKind, AdmissionController, AdmissionRequest, Decision, Identity, LockState, Millis,
};

/// Implementation of the AdmissionService gRPC interface.
pub struct AdmissionServiceImpl {
    /// The shared admission controller
    controller: Arc<AdmissionController>,
}

impl AdmissionServiceImpl {
    /// Create a new AdmissionServiceImpl around the given controller.
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }

    /// Request time, falling back to the server clock when the caller sent none.
    fn resolve_now(&self, now_ms: u64) -> Millis {
        if now_ms == 0 {
            self.controller.now()
        } else {
            now_ms
        }
    }
}

#[tonic::async_trait]
impl AdmissionService for AdmissionServiceImpl {
    /// Decide whether a request may proceed.
    #[instrument(
        skip(self, request),
        fields(
            method = %request.get_ref().method,
            action_kind = request.get_ref().action_kind
        )
    )]
    async fn admit(&self, request: Request<AdmitRequest>) -> Result<Response<AdmitResponse>, Status> {
        let req = request.into_inner();

        if req.method.trim().is_empty() {
            warn!("Received admission request with empty method");
            return Err(Status::invalid_argument("method is required"));
        }

        let identity = identity_from_proto(req.identity)?;
        let action = action_from_proto(req.action_kind)?;

        let mut admission_request =
            AdmissionRequest::new(req.method, identity, action, self.resolve_now(req.now_ms));

        match action {
            ActionKind::Login => {
                if req.username.is_empty() {
                    warn!("Received login admission request without username");
                    return Err(Status::invalid_argument("username is required for login"));
                }
                admission_request = admission_request.with_username(req.username);
            }
            ActionKind::Upload if !req.filename.is_empty() => {
                admission_request = admission_request.with_filename(req.filename);
            }
            ActionKind::Upload | ActionKind::Generic => {}
        }

        debug!(
            identity = %admission_request.identity,
            now_ms = admission_request.now,
            "Processing admission request"
        );

        let decision = self.controller.admit(&admission_request);

        info!(
            identity = %admission_request.identity,
            allowed = decision.is_allowed(),
            reason = decision.reason_code().unwrap_or("none"),
            "Admission decision made"
        );

        Ok(Response::new(response_from_decision(&decision)))
    }

    /// Record the outcome of a credential check.
    #[instrument(
        skip(self, request),
        fields(username = %request.get_ref().username, success = request.get_ref().success)
    )]
    async fn record_login(
        &self,
        request: Request<RecordLoginRequest>,
    ) -> Result<Response<RecordLoginResponse>, Status> {
        let req = request.into_inner();

        if req.username.is_empty() {
            warn!("Received login record without username");
            return Err(Status::invalid_argument("username is required"));
        }

        let state = if req.success {
            self.controller.record_login_success(&req.username);
            LockState::Clear
        } else {
            let now = self.resolve_now(req.now_ms);
            self.controller.record_login_failure(&req.username, now)
        };

        Ok(Response::new(response_from_lock_state(state)))
    }
}

fn identity_from_proto(identity: Option<ProtoIdentity>) -> Result<Identity, Status> {
    let identity = match identity.and_then(|identity| identity.kind) {
        Some(Kind::UserId(id)) => Identity::Authenticated(id),
        Some(Kind::Address(addr)) => Identity::Anonymous(addr),
        None => {
            warn!("Received admission request without identity");
            return Err(Status::invalid_argument("identity is required"));
        }
    };

    if identity.value().is_empty() {
        return Err(Status::invalid_argument("identity must not be empty"));
    }
    Ok(identity)
}

fn action_from_proto(action_kind: i32) -> Result<ActionKind, Status> {
    match ProtoActionKind::try_from(action_kind) {
        Ok(ProtoActionKind::Generic) => Ok(ActionKind::Generic),
        Ok(ProtoActionKind::Upload) => Ok(ActionKind::Upload),
        Ok(ProtoActionKind::Login) => Ok(ActionKind::Login),
        Err(_) => Err(Status::invalid_argument(format!(
            "unknown action kind {}",
            action_kind
        ))),
    }
}

fn response_from_decision(decision: &Decision) -> AdmitResponse {
    match decision.denial() {
        None => AdmitResponse {
            allowed: true,
            ..Default::default()
        },
        Some(denial) => AdmitResponse {
            allowed: false,
            reason: denial.reason_code().to_string(),
            message: denial.to_string(),
            detail: denial.detail().unwrap_or_default(),
            retry_after_ms: denial.retry_after().as_millis() as u64,
            http_status: denial.http_status().map(u32::from).unwrap_or(0),
        },
    }
}

fn response_from_lock_state(state: LockState) -> RecordLoginResponse {
    match state {
        LockState::Clear => RecordLoginResponse {
            state: ProtoLockState::Clear.into(),
            attempts: 0,
            retry_after_ms: 0,
        },
        LockState::Accumulating { attempts } => RecordLoginResponse {
            state: ProtoLockState::Accumulating.into(),
            attempts,
            retry_after_ms: 0,
        },
        LockState::Locked {
            attempts,
            retry_after,
        } => RecordLoginResponse {
            state: ProtoLockState::Locked.into(),
            attempts,
            retry_after_ms: retry_after.as_millis() as u64,
        },
    }
}
