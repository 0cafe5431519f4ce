//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Ledger calls are synchronous and may wait on the storage write lock, so
//! every one runs through `AppState::run` on the blocking pool.

use super::{
    AppState,
    auth::Session,
    identity::email_in_domain,
    types::{
        GrantRequest, GrantResponse, GrantsQuery, GrantsResponse, HealthResponse, LoginRequest,
        LoginResponse, ProfileResponse, ProfileUpdateRequest, RevokeRequest, RevokeResponse,
        RoleRequest, StampsQuery, StampsResponse, UserResponse, UsersResponse,
    },
};
use crate::error::AppError;
use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use stampcard_core::{Actor, Ledger, LedgerError, Role, normalize_email};

/// Resolve the caller's current role from the stored profile.
///
/// A session whose user no longer exists (e.g. after a restore) is treated as
/// unauthenticated.
fn resolve_actor(ledger: &Ledger, session: &Session) -> Result<Actor, AppError> {
    ledger.actor(&session.user_id).map_err(|e| match e {
        LedgerError::TargetNotFound(_) => {
            AppError::Unauthorized("session user no longer exists".to_string())
        }
        other => AppError::Ledger(other),
    })
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse::new(state.ledger.is_persistent()))
}

// =============================================================================
// LOGIN HANDLER
// =============================================================================

/// Exchange an identity token for a session token.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let id_token = request.id_token.trim().to_string();
    if id_token.is_empty() {
        return Err(LedgerError::InvalidRequest("id_token is required".to_string()).into());
    }

    let identity = state.identity.verify(&id_token)?;
    if !email_in_domain(&identity.email, &state.allowed_domain) {
        tracing::warn!(
            event = "login_refused",
            email = %identity.email,
            "login from outside the allowed domain"
        );
        return Err(AppError::Forbidden(format!(
            "only @{} accounts may log in",
            state.allowed_domain
        )));
    }

    let user = state.run(move |ledger| Ok(ledger.login(&identity)?)).await?;
    let (access_token, expires_at) = state.sessions.issue(&user, Utc::now())?;
    tracing::info!(
        event = "login",
        user_id = %user.user_id,
        email = %user.email,
        role = %user.role,
        "user logged in"
    );

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_at,
        user: UserResponse::from(&user),
    }))
}

// =============================================================================
// PROFILE HANDLERS
// =============================================================================

/// Get the caller's profile.
pub async fn get_profile_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state
        .run(move |ledger| {
            resolve_actor(ledger, &session)?;
            Ok(ledger.profile(&session.user_id)?)
        })
        .await?;
    Ok(Json(ProfileResponse {
        user: UserResponse::from(&user),
    }))
}

/// Change the caller's display name.
pub async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<ProfileUpdateRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state
        .run(move |ledger| {
            resolve_actor(ledger, &session)?;
            Ok(ledger.update_display_name(&session.user_id, &request.display_name)?)
        })
        .await?;
    Ok(Json(ProfileResponse {
        user: UserResponse::from(&user),
    }))
}

// =============================================================================
// STAMP HANDLERS
// =============================================================================

/// Get a stamp card: the caller's own, or `?email=` for another user.
pub async fn get_stamps_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<StampsQuery>,
) -> Result<Json<StampsResponse>, AppError> {
    let response = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            let stamps = ledger.stamp_set(&actor, query.email.as_deref())?;
            let email = match query.email.as_deref().map(str::trim) {
                Some(email) if !email.is_empty() => normalize_email(email)?,
                _ => actor.email,
            };
            Ok(StampsResponse::new(email, stamps))
        })
        .await?;
    Ok(Json(response))
}

/// Grant a stamp.
pub async fn grant_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, AppError> {
    let (actor, target_email, stamp_id) = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            let stamp_id = ledger.grant(
                &actor,
                &request.target_email,
                request.stamp_id.as_deref(),
                request.auto,
            )?;
            let target_email = normalize_email(&request.target_email)?;
            Ok((actor, target_email, stamp_id))
        })
        .await?;

    tracing::info!(
        event = "stamp_granted",
        actor = %actor.email,
        role = %actor.role,
        target_email = %target_email,
        stamp_id = %stamp_id,
        "stamp granted"
    );
    Ok(Json(GrantResponse {
        message: format!("{} granted to {}", stamp_id, target_email),
        target_email,
        stamp_id,
    }))
}

/// Revoke a stamp. Admin only.
pub async fn revoke_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, AppError> {
    let (actor, target_email, outcome) = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            let outcome = ledger.revoke(&actor, &request.target_email, &request.stamp_id)?;
            let target_email = normalize_email(&request.target_email)?;
            Ok((actor, target_email, outcome))
        })
        .await?;

    tracing::info!(
        event = "stamp_revoked",
        actor = %actor.email,
        target_email = %target_email,
        stamp_id = %outcome.stamp_id,
        was_granted = outcome.was_granted,
        released_manager = outcome.released.as_ref().map(|r| r.manager_email.as_str()),
        "stamp revoked"
    );
    Ok(Json(RevokeResponse {
        target_email,
        stamp_id: outcome.stamp_id,
        was_granted: outcome.was_granted,
        released_grant: outcome.released,
    }))
}

// =============================================================================
// ADMIN HANDLERS
// =============================================================================

/// Change a user's role. Admin only.
pub async fn set_role_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let (actor, user) = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            // Role before parsing: a student probing role names gets 403
            if actor.role != Role::Admin {
                return Err(LedgerError::PermissionDenied {
                    action: "changing roles",
                    required: "admin",
                }
                .into());
            }
            let role: Role = request.new_role.parse()?;
            let user = ledger.set_role(&actor, &request.target_email, role)?;
            Ok((actor, user))
        })
        .await?;

    tracing::info!(
        event = "role_changed",
        actor = %actor.email,
        target_email = %user.email,
        role = %user.role,
        "role changed"
    );
    Ok(Json(UserResponse::from(&user)))
}

/// List every user with their card. Admin only.
pub async fn list_users_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<UsersResponse>, AppError> {
    let users = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            Ok(ledger.list_users(&actor)?)
        })
        .await?;
    Ok(Json(UsersResponse {
        total: users.len(),
        users: users.iter().map(UserResponse::from).collect(),
    }))
}

/// Manager grant history, optionally for one recipient. Admin only.
pub async fn grant_history_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<GrantsQuery>,
) -> Result<Json<GrantsResponse>, AppError> {
    let grants = state
        .run(move |ledger| {
            let actor = resolve_actor(ledger, &session)?;
            match query.target_email.as_deref().map(str::trim) {
                Some(target) if !target.is_empty() => Ok(ledger.grants_for_target(&actor, target)?),
                _ => Ok(ledger.grant_history(&actor)?),
            }
        })
        .await?;
    Ok(Json(GrantsResponse::from(grants)))
}
