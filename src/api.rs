//! HTTP API endpoints.
//!
//! Voter endpoints identify the caller from headers set by the fronting
//! identity provider; admin endpoints additionally accept the shared
//! security code.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::allowlist::{extract_emails, AuthorizationError, SyncOptions, SyncReport};
use crate::state::{
    AdminCredential, AdminError, AppState, DashboardView, ResultsExport, StatusReport,
    SubmissionError,
};
use crate::store::StoreError;
use crate::types::*;
use crate::validation::{ValidationError, ValidationResult};

pub const UID_HEADER: &str = "x-auth-uid";
pub const EMAIL_HEADER: &str = "x-auth-email";
pub const NAME_HEADER: &str = "x-auth-name";
pub const ADMIN_CODE_HEADER: &str = "x-admin-code";

/// Error response with a machine-readable code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.to_string(),
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!("Store error: {}", e);
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(e: AuthorizationError) -> Self {
        ApiError::new(StatusCode::FORBIDDEN, "NOT_ALLOWED", e.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_BALLOT", e.to_string())
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Validation(e) => e.into(),
            e @ SubmissionError::VotingLocked => {
                ApiError::new(StatusCode::CONFLICT, "VOTING_LOCKED", e.to_string())
            }
            e @ SubmissionError::AlreadyVoted => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_VOTED", e.to_string())
            }
            e @ SubmissionError::IdentityMismatch { .. } => {
                ApiError::new(StatusCode::FORBIDDEN, "IDENTITY_MISMATCH", e.to_string())
            }
            SubmissionError::Store(e) => e.into(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        match e {
            e @ AdminError::Unauthorized => {
                ApiError::new(StatusCode::FORBIDDEN, "ADMIN_REQUIRED", e.to_string())
            }
            AdminError::InvalidTransition(msg) => {
                ApiError::new(StatusCode::CONFLICT, "INVALID_TRANSITION", msg)
            }
            AdminError::Store(e) => e.into(),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Caller identity from the identity provider's headers
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let uid = header(headers, UID_HEADER).ok_or_else(|| {
        ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Sign in first")
    })?;
    Ok(Identity {
        uid,
        email: header(headers, EMAIL_HEADER),
        display_name: header(headers, NAME_HEADER),
    })
}

pub fn admin_credential(headers: &HeaderMap) -> AdminCredential {
    AdminCredential {
        email: header(headers, EMAIL_HEADER),
        code: header(headers, ADMIN_CODE_HEADER),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublicConfig {
    pub candidates: Vec<Candidate>,
    pub tiers: Vec<TierRule>,
    pub expected_voters: u32,
}

/// GET /api/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<PublicConfig> {
    Json(PublicConfig {
        candidates: state.config.candidates.clone(),
        tiers: state.config.tiers.clone(),
        expected_voters: state.config.expected_voters,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BallotRequest {
    #[serde(default)]
    pub selections: Selections,
}

/// POST /api/validate
pub async fn validate_ballot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BallotRequest>,
) -> Json<ValidationResult> {
    Json(state.validate_selections(&req.selections))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub uid: String,
    pub email: Option<String>,
    pub allowed: bool,
    pub has_voted: bool,
    pub is_locked: bool,
}

/// GET /api/me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let identity = identity_from_headers(&headers)?;
    let (allowed, email) = match state.allowlist.authorize(&identity).await {
        Ok(email) => (true, Some(email)),
        Err(_) => (false, identity.email.clone()),
    };

    // Vote status is only revealed to allowed callers
    let has_voted = if allowed {
        state.has_voted(&identity.uid).await?
    } else {
        false
    };
    let is_locked = state.voting_status().await?.is_locked;

    Ok(Json(MeResponse {
        uid: identity.uid,
        email,
        allowed,
        has_voted,
        is_locked,
    }))
}

/// POST /api/vote
pub async fn submit_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BallotRequest>,
) -> Result<Json<VoteRecord>, ApiError> {
    let identity = identity_from_headers(&headers)?;
    state.allowlist.authorize(&identity).await?;
    let record = state
        .submit_vote(&identity.uid, &identity, req.selections)
        .await?;
    Ok(Json(record))
}

/// GET /api/standings
pub async fn get_standings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardView>, ApiError> {
    Ok(Json(state.dashboard().await?))
}

/// GET /api/status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VotingStatus>, ApiError> {
    Ok(Json(state.voting_status().await?))
}

/// POST /api/admin/lock
pub async fn lock_voting(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<VotingStatus>, ApiError> {
    Ok(Json(state.lock_voting(&admin_credential(&headers)).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub deleted: usize,
}

/// POST /api/admin/reset
pub async fn reset_votes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, ApiError> {
    let deleted = state.reset_all_votes(&admin_credential(&headers)).await?;
    Ok(Json(ResetResponse { deleted }))
}

/// GET /api/admin/report
pub async fn status_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(state.status_report(&admin_credential(&headers)).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub detailed: bool,
}

/// GET /api/admin/export?detailed=true
pub async fn export_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ResultsExport>, ApiError> {
    Ok(Json(
        state
            .export_results(&admin_credential(&headers), query.detailed)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct AllowlistSyncRequest {
    /// Desired emails as a list
    #[serde(default)]
    pub emails: Vec<String>,
    /// Desired emails as CSV text, merged with `emails`
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(flatten)]
    pub options: SyncOptions,
}

/// POST /api/admin/allowlist/sync
pub async fn sync_allowlist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AllowlistSyncRequest>,
) -> Result<Json<SyncReport>, ApiError> {
    let mut desired = req.emails;
    if let Some(csv) = &req.csv {
        desired.extend(extract_emails(csv));
    }
    let report = state
        .sync_allowlist(&admin_credential(&headers), &desired, req.options)
        .await?;
    Ok(Json(report))
}
