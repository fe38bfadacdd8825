//! # AutoSend Store
//!
//! SQLite persistence for AutoSend: message records, the singleton scheduler
//! state with its start/stop audit log, and the delivery cache.

pub mod cache;
pub mod db;

pub use db::SqliteStore;
