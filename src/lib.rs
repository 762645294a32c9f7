pub mod api;
pub mod auth;
pub mod checkout;
pub mod error;
pub mod models;
pub mod schema;
