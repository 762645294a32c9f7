use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::checkout::order_total;
use crate::error::AppError;
use crate::models::{CartItem, NewCartItem, Product};
use crate::schema::{cart_items, products};

use super::{AppState, MessageResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/:id", put(update_cart_item).delete(remove_from_cart))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    #[serde(rename = "productId")]
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartRequest {
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i32,
}

/// The product facts a cart line is displayed with.
#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    pub stock: i32,
}

impl From<Product> for ProductSummary {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            image_url: product.image_url,
            stock: product.stock,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartLinePayload {
    #[serde(flatten)]
    pub item: CartItem,
    pub product: ProductSummary,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    #[serde(rename = "cartItems")]
    pub cart_items: Vec<CartLinePayload>,
    pub total: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub message: String,
    #[serde(rename = "cartItem")]
    pub cart_item: CartLinePayload,
}

pub async fn get_cart(
    user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<CartResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let rows: Vec<(CartItem, Product)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::user_id.eq(user.id()))
        .order(cart_items::created_at.asc())
        .load(&mut conn)
        .await?;

    let total = order_total(rows.iter().map(|(item, _)| item));

    Ok(Json(CartResponse {
        cart_items: rows
            .into_iter()
            .map(|(item, product)| CartLinePayload {
                item,
                product: ProductSummary::from(product),
            })
            .collect(),
        total,
    }))
}

async fn active_product(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> Result<Product, AppError> {
    let product: Option<Product> = products::table
        .find(id)
        .filter(products::is_active.eq(true))
        .first(conn)
        .await
        .optional()?;
    product.ok_or(AppError::NotFound("Product"))
}

pub async fn add_to_cart(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartItemResponse>), AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let product = active_product(&mut conn, req.product_id).await?;

    if product.stock < req.quantity {
        return Err(AppError::InsufficientStock(product.name));
    }

    let existing: Option<CartItem> = cart_items::table
        .filter(cart_items::user_id.eq(user.id()))
        .filter(cart_items::product_id.eq(req.product_id))
        .first(&mut conn)
        .await
        .optional()?;

    if let Some(existing) = existing {
        // Same product added again: merge quantities, re-check stock for the sum.
        let quantity = existing.quantity + req.quantity;
        if product.stock < quantity {
            return Err(AppError::InsufficientStock(product.name));
        }

        let item: CartItem = diesel::update(cart_items::table.find(existing.id))
            .set((
                cart_items::quantity.eq(quantity),
                cart_items::updated_at.eq(Utc::now()),
            ))
            .get_result(&mut conn)
            .await?;

        return Ok((
            StatusCode::OK,
            Json(CartItemResponse {
                message: "Cart updated successfully".to_string(),
                cart_item: CartLinePayload {
                    item,
                    product: ProductSummary::from(product),
                },
            }),
        ));
    }

    // The catalog price is frozen on the line at add time.
    let item: CartItem = diesel::insert_into(cart_items::table)
        .values(&NewCartItem {
            id: Uuid::new_v4(),
            user_id: user.id(),
            product_id: req.product_id,
            quantity: req.quantity,
            price_at_add: product.price.clone(),
        })
        .get_result(&mut conn)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CartItemResponse {
            message: "Item added to cart successfully".to_string(),
            cart_item: CartLinePayload {
                item,
                product: ProductSummary::from(product),
            },
        }),
    ))
}

pub async fn update_cart_item(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<Json<CartItemResponse>, AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let row: Option<(CartItem, Product)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::id.eq(id))
        .filter(cart_items::user_id.eq(user.id()))
        .first(&mut conn)
        .await
        .optional()?;
    let (existing, product) = row.ok_or(AppError::NotFound("Cart item"))?;

    if product.stock < req.quantity {
        return Err(AppError::InsufficientStock(product.name));
    }

    let item: CartItem = diesel::update(cart_items::table.find(existing.id))
        .set((
            cart_items::quantity.eq(req.quantity),
            cart_items::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .await?;

    Ok(Json(CartItemResponse {
        message: "Cart item updated successfully".to_string(),
        cart_item: CartLinePayload {
            item,
            product: ProductSummary::from(product),
        },
    }))
}

pub async fn remove_from_cart(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let removed = diesel::delete(
        cart_items::table
            .filter(cart_items::id.eq(id))
            .filter(cart_items::user_id.eq(user.id())),
    )
    .execute(&mut conn)
    .await?;
    if removed == 0 {
        return Err(AppError::NotFound("Cart item"));
    }

    Ok(Json(MessageResponse::new(
        "Item removed from cart successfully",
    )))
}

pub async fn clear_cart(
    user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user.id())))
        .execute(&mut conn)
        .await?;

    Ok(Json(MessageResponse::new("Cart cleared successfully")))
}
