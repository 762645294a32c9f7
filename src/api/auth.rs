use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{hash_password, verify_password, CurrentUser};
use crate::error::AppError;
use crate::models::{NewUser, User, UserPublic, UserRole};
use crate::schema::users;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[serde(rename = "fullname")]
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub full_name: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: UserPublic,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserPublic,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(&req.email))
        .first(&mut conn)
        .await
        .optional()?;
    if existing.is_some() {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    // Only a recognized role is honored; anything else falls back to customer.
    let role = req
        .role
        .as_deref()
        .and_then(UserRole::parse)
        .unwrap_or(UserRole::Customer);

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: req.email.clone(),
        password_hash: hash_password(&req.password)?,
        full_name: req.full_name.clone(),
        role: role.as_str().to_string(),
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::Conflict("User already exists".to_string())
            }
            other => AppError::from(other),
        })?;

    let token = state.tokens.issue(user.id, &user.role)?;

    info!("Registered user {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".to_string(),
            token,
            user: UserPublic::from(&user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let user: Option<User> = users::table
        .filter(users::email.eq(&req.email))
        .filter(users::is_active.eq(true))
        .first(&mut conn)
        .await
        .optional()?;

    // Unknown email and wrong password are indistinguishable to the caller.
    let user = user.ok_or(AppError::Unauthorized("Invalid credentials"))?;
    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials"));
    }

    let token = state.tokens.issue(user.id, &user.role)?;

    info!("User {} logged in", user.id);

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        token,
        user: UserPublic::from(&user),
    }))
}

pub async fn profile(user: CurrentUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user: UserPublic::from(&user.0),
    })
}
