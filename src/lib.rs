pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod proto;
pub mod relay;
pub mod service;
pub mod store;
pub mod utils;

pub use engine::MoneyMovementEngine;
pub use error::{ErrorKind, MoneyMovementError, Result};
