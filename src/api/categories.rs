use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::models::{Category, NewCategory};
use crate::schema::categories;

use super::{AppState, MessageResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route(
            "/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description must not exceed 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub categories: Vec<Category>,
}

#[derive(Debug, Serialize)]
pub struct CategoryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub category: Category,
}

fn map_unique_name(e: diesel::result::Error) -> AppError {
    match e {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::Conflict("Category name already exists".to_string())
        }
        other => AppError::from(other),
    }
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<CategoriesResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let items: Vec<Category> = categories::table
        .filter(categories::is_active.eq(true))
        .order(categories::name.asc())
        .load(&mut conn)
        .await?;

    Ok(Json(CategoriesResponse { categories: items }))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CategoryResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let category: Option<Category> = categories::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?;
    let category = category.ok_or(AppError::NotFound("Category"))?;

    Ok(Json(CategoryResponse {
        message: None,
        category,
    }))
}

pub async fn create_category(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<CategoryResponse>), AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let category: Category = diesel::insert_into(categories::table)
        .values(&NewCategory {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
        })
        .get_result(&mut conn)
        .await
        .map_err(map_unique_name)?;

    Ok((
        StatusCode::CREATED,
        Json(CategoryResponse {
            message: Some("Category created successfully".to_string()),
            category,
        }),
    ))
}

pub async fn update_category(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<CategoryResponse>, AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let category: Option<Category> = diesel::update(categories::table.find(id))
        .set((
            categories::name.eq(req.name),
            categories::description.eq(req.description),
            categories::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(map_unique_name)?;
    let category = category.ok_or(AppError::NotFound("Category"))?;

    Ok(Json(CategoryResponse {
        message: Some("Category updated successfully".to_string()),
        category,
    }))
}

pub async fn delete_category(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let deactivated = diesel::update(categories::table.find(id))
        .set((
            categories::is_active.eq(false),
            categories::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
    if deactivated == 0 {
        return Err(AppError::NotFound("Category"));
    }

    Ok(Json(MessageResponse::new("Category deleted successfully")))
}
