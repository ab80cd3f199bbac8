//! # LegacyGuard Gateway
//!
//! The HTTP surface of the delivery service: capsule and trusted-people
//! CRUD under bearer auth, the notification audit log, a manual dispatch
//! trigger, emergency activation, and the HMAC-signed will-validation
//! webhook.

pub mod auth;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
