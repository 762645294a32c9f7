use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::models::{Category, NewProduct, Product, ProductChanges};
use crate::schema::{categories, products};

use super::{AppState, MessageResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductListQuery {
    #[validate(range(min = 1, message = "Page must be a positive integer"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub category: Option<Uuid>,
    #[serde(rename = "minPrice")]
    pub min_price: Option<BigDecimal>,
    #[serde(rename = "maxPrice")]
    pub max_price: Option<BigDecimal>,
    #[validate(length(max = 100, message = "Search term must not exceed 100 characters"))]
    pub search: Option<String>,
}

fn non_negative(value: &BigDecimal) -> Result<(), ValidationError> {
    if value < &BigDecimal::zero() {
        return Err(ValidationError::new("non_negative")
            .with_message("Price must be a positive number".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductRequest {
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(custom(function = non_negative))]
    pub price: BigDecimal,
    #[validate(range(min = 0, message = "Stock must be a non-negative integer"))]
    pub stock: i32,
    #[serde(rename = "categoryId")]
    pub category_id: Uuid,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategorySummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ProductPayload {
    #[serde(flatten)]
    pub product: Product,
    pub category: Option<CategorySummary>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<ProductPayload>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub product: ProductPayload,
}

fn total_pages(total: i64, limit: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

async fn category_names(
    conn: &mut AsyncPgConnection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, String>, AppError> {
    let rows: Vec<(Uuid, String)> = categories::table
        .filter(categories::id.eq_any(ids))
        .select((categories::id, categories::name))
        .load(conn)
        .await?;
    Ok(rows.into_iter().collect())
}

fn with_category(product: Product, names: &HashMap<Uuid, String>) -> ProductPayload {
    let category = names.get(&product.category_id).map(|name| CategorySummary {
        id: product.category_id,
        name: name.clone(),
    });
    ProductPayload { product, category }
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<ProductListResponse>, AppError> {
    query.validate()?;

    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(10);
    let offset = (page - 1) * limit;

    let mut conn = state.pool.get().await?;

    let mut select = products::table
        .filter(products::is_active.eq(true))
        .into_boxed();
    let mut count = products::table
        .filter(products::is_active.eq(true))
        .select(count_star())
        .into_boxed();

    if let Some(category) = query.category {
        select = select.filter(products::category_id.eq(category));
        count = count.filter(products::category_id.eq(category));
    }
    if let Some(min_price) = &query.min_price {
        select = select.filter(products::price.ge(min_price.clone()));
        count = count.filter(products::price.ge(min_price.clone()));
    }
    if let Some(max_price) = &query.max_price {
        select = select.filter(products::price.le(max_price.clone()));
        count = count.filter(products::price.le(max_price.clone()));
    }
    if let Some(search) = &query.search {
        let pattern = format!("%{search}%");
        select = select.filter(products::name.ilike(pattern.clone()));
        count = count.filter(products::name.ilike(pattern));
    }

    let total: i64 = count.first(&mut conn).await?;
    let items: Vec<Product> = select
        .order(products::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .await?;

    let ids: Vec<Uuid> = items.iter().map(|p| p.category_id).collect();
    let names = category_names(&mut conn, &ids).await?;

    Ok(Json(ProductListResponse {
        products: items
            .into_iter()
            .map(|product| with_category(product, &names))
            .collect(),
        pagination: Pagination {
            page,
            limit,
            total,
            pages: total_pages(total, limit),
        },
    }))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let product: Option<Product> = products::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?;
    let product = product.ok_or(AppError::NotFound("Product"))?;

    let names = category_names(&mut conn, &[product.category_id]).await?;

    Ok(Json(ProductResponse {
        message: None,
        product: with_category(product, &names),
    }))
}

async fn ensure_category_exists(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> Result<Category, AppError> {
    let category: Option<Category> = categories::table
        .find(id)
        .first(conn)
        .await
        .optional()?;
    category.ok_or(AppError::NotFound("Category"))
}

pub async fn create_product(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let category = ensure_category_exists(&mut conn, req.category_id).await?;

    let product: Product = diesel::insert_into(products::table)
        .values(&NewProduct {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            price: req.price,
            stock: req.stock,
            category_id: req.category_id,
            image_url: req.image_url,
        })
        .get_result(&mut conn)
        .await?;

    let payload = ProductPayload {
        category: Some(CategorySummary {
            id: category.id,
            name: category.name,
        }),
        product,
    };

    Ok((
        StatusCode::CREATED,
        Json(ProductResponse {
            message: Some("Product created successfully".to_string()),
            product: payload,
        }),
    ))
}

pub async fn update_product(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<ProductResponse>, AppError> {
    req.validate()?;

    let mut conn = state.pool.get().await?;

    let category = ensure_category_exists(&mut conn, req.category_id).await?;

    let product: Option<Product> = diesel::update(products::table.find(id))
        .set(&ProductChanges {
            name: req.name,
            description: req.description,
            price: req.price,
            stock: req.stock,
            category_id: req.category_id,
            image_url: req.image_url,
            updated_at: Utc::now(),
        })
        .get_result(&mut conn)
        .await
        .optional()?;
    let product = product.ok_or(AppError::NotFound("Product"))?;

    let payload = ProductPayload {
        category: Some(CategorySummary {
            id: category.id,
            name: category.name,
        }),
        product,
    };

    Ok(Json(ProductResponse {
        message: Some("Product updated successfully".to_string()),
        product: payload,
    }))
}

pub async fn delete_product(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut conn = state.pool.get().await?;

    let deactivated = diesel::update(products::table.find(id))
        .set((
            products::is_active.eq(false),
            products::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
    if deactivated == 0 {
        return Err(AppError::NotFound("Product"));
    }

    Ok(Json(MessageResponse::new("Product deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(95, 10), 10);
    }

    #[test]
    fn negative_price_fails_validation() {
        let req = ProductRequest {
            name: "Widget".to_string(),
            description: None,
            price: BigDecimal::from(-1),
            stock: 3,
            category_id: Uuid::new_v4(),
            image_url: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("price"));
    }
}
