//! # AutoSend Gateway
//!
//! Axum HTTP API: message intake and listing, delivery cache lookups and
//! scheduler start/stop/status.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, serve};
