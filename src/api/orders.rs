use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AdminUser, CurrentUser};
use crate::checkout::{checkout, update_status, OrderWithItems};
use crate::error::{AppError, FieldError};
use crate::models::{Order, OrderItem, OrderStatus, ShippingAddress, User, UserPublic};
use crate::schema::{orders, users};

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[serde(rename = "shippingAddress")]
    #[validate(nested)]
    pub shipping_address: ShippingAddress,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// An order as returned to clients: its fields, its lines, and (for
/// privileged listings) the owning user.
#[derive(Debug, Serialize)]
pub struct OrderPayload {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserPublic>,
}

#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    pub orders: Vec<OrderPayload>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub order: OrderPayload,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub message: String,
    pub order: OrderWithItems,
}

pub async fn create_order(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;
    let order = checkout(&mut conn, user.id(), &req.shipping_address).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            message: "Order created successfully".to_string(),
            order,
        }),
    ))
}

async fn hydrate(
    conn: &mut AsyncPgConnection,
    found: Vec<Order>,
    include_users: bool,
) -> Result<Vec<OrderPayload>, AppError> {
    let lines: Vec<Vec<OrderItem>> = OrderItem::belonging_to(&found)
        .load::<OrderItem>(conn)
        .await?
        .grouped_by(&found);

    let owners: HashMap<Uuid, UserPublic> = if include_users {
        let ids: Vec<Uuid> = found.iter().map(|order| order.user_id).collect();
        let rows: Vec<User> = users::table
            .filter(users::id.eq_any(&ids))
            .load(conn)
            .await?;
        rows.iter()
            .map(|user| (user.id, UserPublic::from(user)))
            .collect()
    } else {
        HashMap::new()
    };

    Ok(found
        .into_iter()
        .zip(lines)
        .map(|(order, items)| {
            let user = owners.get(&order.user_id).cloned();
            OrderPayload { order, items, user }
        })
        .collect())
}

pub async fn list_orders(
    user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<OrdersResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let mut query = orders::table.into_boxed();
    if !user.is_admin() {
        query = query.filter(orders::user_id.eq(user.id()));
    }
    let found: Vec<Order> = query
        .order(orders::created_at.desc())
        .load(&mut conn)
        .await?;

    let payloads = hydrate(&mut conn, found, user.is_admin()).await?;

    Ok(Json(OrdersResponse { orders: payloads }))
}

pub async fn get_order(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let mut query = orders::table.filter(orders::id.eq(id)).into_boxed();
    if !user.is_admin() {
        query = query.filter(orders::user_id.eq(user.id()));
    }
    let order: Option<Order> = query.first(&mut conn).await.optional()?;
    let order = order.ok_or(AppError::NotFound("Order"))?;

    let mut payloads = hydrate(&mut conn, vec![order], user.is_admin()).await?;
    let payload = payloads.pop().ok_or_else(|| {
        AppError::internal("order disappeared during hydration".to_string())
    })?;

    Ok(Json(OrderResponse {
        message: None,
        order: payload,
    }))
}

pub async fn update_order_status(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    // Membership in the status set is the only constraint; transitions are
    // otherwise unrestricted.
    let status = OrderStatus::parse(&req.status).ok_or_else(|| {
        let allowed = OrderStatus::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::Validation(vec![FieldError {
            field: "status".to_string(),
            message: format!("Status must be one of: {allowed}"),
        }])
    })?;

    let mut conn = state.pool.get().await?;

    let order = update_status(&mut conn, id, status).await?;

    let mut payloads = hydrate(&mut conn, vec![order], true).await?;
    let payload = payloads.pop().ok_or_else(|| {
        AppError::internal("order disappeared during hydration".to_string())
    })?;

    Ok(Json(OrderResponse {
        message: Some("Order status updated successfully".to_string()),
        order: payload,
    }))
}
