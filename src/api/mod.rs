//! HTTP surface: the axum gateway and the function-URL event handler.
pub mod function_url;
pub mod handlers;
pub mod request;
pub mod routes;

pub use routes::{router, AppState};
