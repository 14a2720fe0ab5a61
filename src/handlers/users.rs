use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{RegisterUser, UserRole};
use crate::routes::AppState;
use crate::ticket_code;
use crate::utils::error::AppError;
use crate::utils::response::{success, success_with_status};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub document: String,
    /// `client`, `operator` or `administrator`.
    pub role: String,
    pub assigned_event: Option<Uuid>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::ValidationError("name must not be empty".into()));
    }
    if !req.email.contains('@') {
        return Err(AppError::ValidationError(format!(
            "'{}' is not a valid email address",
            req.email
        )));
    }
    let document = ticket_code::normalize(&req.document);
    if document.is_empty() {
        return Err(AppError::ValidationError(
            "document must not be empty".into(),
        ));
    }
    let role = UserRole::from_parts(&req.role, req.assigned_event)
        .map_err(AppError::ValidationError)?;
    if state.store.user_by_document(&document).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "document '{document}' is already registered"
        )));
    }

    let user = state
        .store
        .register_user(RegisterUser {
            name: req.name.trim().to_string(),
            email: req.email,
            document,
            role,
        })
        .await?;
    Ok(success_with_status(user, "User registered", StatusCode::CREATED).into_response())
}

#[derive(Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Enables or disables an account. Inactive operators are refused at the
/// validation endpoint.
pub async fn set_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Response, AppError> {
    let user = state.store.set_user_active(id, req.active).await?;
    let message = if user.is_active {
        "Account activated"
    } else {
        "Account deactivated"
    };
    Ok(success(user, message).into_response())
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let user = state
        .store
        .user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;
    Ok(success(user, "User found").into_response())
}
