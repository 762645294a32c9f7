//! Checkout: converts a user's cart into a durable order while enforcing
//! stock availability, as one all-or-nothing database transaction.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    CartItem, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, Product, ShippingAddress,
};
use crate::schema::{cart_items, order_items, orders, products};

/// An order together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Runs the whole checkout for `user_id` inside a single transaction:
///
/// 1. load the cart snapshot (empty cart aborts before any write);
/// 2. row-lock every product and verify stock, failing on the first line
///    whose requested quantity exceeds what is available;
/// 3. total the order from the prices frozen at cart-add time;
/// 4. insert the order (status `pending`) and one line per cart item,
///    snapshotting product name and frozen price;
/// 5. decrement stock for every line;
/// 6. clear the cart.
///
/// Any failure rolls the transaction back, leaving cart and stock untouched.
/// The shipping address must already be structurally validated.
pub async fn checkout(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    address: &ShippingAddress,
) -> Result<OrderWithItems, AppError> {
    let address_json = serde_json::to_value(address)
        .map_err(|e| AppError::internal(format!("failed to encode shipping address: {e}")))?;

    let created = conn
        .transaction::<OrderWithItems, AppError, _>(|conn| {
            async move {
                let lines: Vec<CartItem> = cart_items::table
                    .filter(cart_items::user_id.eq(user_id))
                    .order(cart_items::created_at.asc())
                    .load(conn)
                    .await?;

                if lines.is_empty() {
                    return Err(AppError::EmptyCart);
                }

                // Lock every product row for the remainder of the transaction
                // so concurrent checkouts serialize on the same stock.
                let mut locked = Vec::with_capacity(lines.len());
                for line in &lines {
                    let product: Option<Product> = products::table
                        .find(line.product_id)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    locked.push(product.ok_or(AppError::NotFound("Product"))?);
                }

                if let Some(name) = first_shortage(
                    lines
                        .iter()
                        .zip(&locked)
                        .map(|(line, product)| (product.name.as_str(), product.stock, line.quantity)),
                ) {
                    return Err(AppError::InsufficientStock(name.to_string()));
                }

                let total_amount = order_total(&lines);

                let order: Order = diesel::insert_into(orders::table)
                    .values(&NewOrder {
                        id: Uuid::new_v4(),
                        user_id,
                        total_amount,
                        shipping_address: address_json,
                        status: OrderStatus::Pending.as_str().to_string(),
                    })
                    .get_result(conn)
                    .await?;

                let new_items: Vec<NewOrderItem> = lines
                    .iter()
                    .zip(&locked)
                    .map(|(line, product)| NewOrderItem {
                        id: Uuid::new_v4(),
                        order_id: order.id,
                        product_id: line.product_id,
                        quantity: line.quantity,
                        price_at_time: line.price_at_add.clone(),
                        product_name: product.name.clone(),
                    })
                    .collect();
                let items: Vec<OrderItem> = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .get_results(conn)
                    .await?;

                for line in &lines {
                    diesel::update(products::table.find(line.product_id))
                        .set((
                            products::stock.eq(products::stock - line.quantity),
                            products::updated_at.eq(chrono::Utc::now()),
                        ))
                        .execute(conn)
                        .await?;
                }

                diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user_id)))
                    .execute(conn)
                    .await?;

                Ok(OrderWithItems { order, items })
            }
            .scope_boxed()
        })
        .await?;

    info!(
        "Created order {} for user {} ({} items, total {})",
        created.order.id,
        user_id,
        created.items.len(),
        created.order.total_amount
    );

    Ok(created)
}

/// Sets an order's status. Membership in [`OrderStatus`] is the only
/// constraint; any status may follow any other. Everything else about the
/// order stays frozen.
pub async fn update_status(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    status: OrderStatus,
) -> Result<Order, AppError> {
    let order: Option<Order> = diesel::update(orders::table.find(order_id))
        .set((
            orders::status.eq(status.as_str()),
            orders::updated_at.eq(chrono::Utc::now()),
        ))
        .get_result(conn)
        .await
        .optional()?;
    let order = order.ok_or(AppError::NotFound("Order"))?;

    info!("Order {} status set to {}", order.id, order.status);

    Ok(order)
}

/// Sum of `quantity × price_at_add` over the cart, using the frozen per-line
/// prices rather than the live catalog price.
pub fn order_total<'a>(lines: impl IntoIterator<Item = &'a CartItem>) -> BigDecimal {
    lines.into_iter().fold(BigDecimal::zero(), |total, line| {
        total + &line.price_at_add * BigDecimal::from(line.quantity)
    })
}

/// Returns the name of the first line whose requested quantity exceeds the
/// available stock, if any. Input tuples are `(name, stock, requested)`.
fn first_shortage<'a>(lines: impl IntoIterator<Item = (&'a str, i32, i32)>) -> Option<&'a str> {
    lines
        .into_iter()
        .find(|(_, stock, requested)| stock < requested)
        .map(|(name, _, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn line(quantity: i32, price: &str) -> CartItem {
        CartItem {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            price_at_add: BigDecimal::from_str(price).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn total_is_quantity_times_frozen_price() {
        let lines = vec![line(2, "10.00"), line(3, "1.50")];
        assert_eq!(order_total(&lines), BigDecimal::from_str("24.50").unwrap());
    }

    #[test]
    fn total_of_no_lines_is_zero() {
        let lines: Vec<CartItem> = Vec::new();
        assert_eq!(order_total(&lines), BigDecimal::zero());
    }

    #[test]
    fn total_keeps_exact_decimal_precision() {
        let lines = vec![line(3, "0.10")];
        assert_eq!(order_total(&lines), BigDecimal::from_str("0.30").unwrap());
    }

    #[test]
    fn shortage_reports_first_offender_in_iteration_order() {
        let shortage = first_shortage(vec![
            ("widget", 5, 5),
            ("gadget", 2, 3),
            ("doodad", 0, 1),
        ]);
        assert_eq!(shortage, Some("gadget"));
    }

    #[test]
    fn exact_stock_match_is_not_a_shortage() {
        assert_eq!(first_shortage(vec![("widget", 4, 4)]), None);
    }
}
