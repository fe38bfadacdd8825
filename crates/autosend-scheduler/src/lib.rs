//! # AutoSend Scheduler
//!
//! Periodic dispatch of pending messages: the delivery client with its
//! retry policy, per-message dispatch, and the start/stop engine.

pub mod delivery;
pub mod dispatch;
pub mod engine;

#[cfg(test)]
mod testing;

pub use delivery::{Deliver, DeliveryClient, DeliveryError};
pub use dispatch::{DispatchContext, DispatchOutcome, dispatch_message};
pub use engine::{DispatchOptions, DispatchScheduler, StartOutcome, StatusView, StopOutcome};
