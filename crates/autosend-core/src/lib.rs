//! # AutoSend Core
//!
//! Shared models, collaborator traits, configuration and errors for the
//! AutoSend message dispatcher.

pub mod config;
pub mod error;
pub mod models;
pub mod traits;
pub mod validation;

pub use config::AutoSendConfig;
pub use error::{AutoSendError, Result};
pub use models::{
    DeliveryAck, DeliveryRecord, DeliveryRequest, Message, MessageStatus, SchedulerAction,
    SchedulerEvent, SchedulerState, SCHEDULER_STATE_ID,
};
pub use traits::{DeliveryCache, MessageFilter, MessageSort, MessageStore, SchedulerStateStore};
