//! API routes.

pub mod chat;
pub mod health;

pub use chat::request_stream_handler;
pub use health::health_routes;
