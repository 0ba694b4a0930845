//! Thin `axum` shell: the only caller of the Authenticator, Rate Limiter,
//! and Query Orchestrator from outside their own tests.

pub mod server;
pub mod types;

pub use server::{build_router, GatewayState};
