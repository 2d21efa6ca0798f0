//! API routes module.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod websocket;

pub use middleware::{API_KEY_HEADER, TenantContext};
pub use routes::create_router;
