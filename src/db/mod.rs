//! PostgreSQL persistence for the bot registry.

mod pool;
mod registry;
mod schema;

pub use pool::DatabasePool;
pub use registry::PgBotRegistry;
pub use schema::*;
