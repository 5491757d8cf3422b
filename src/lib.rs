//! Next-best-action engine.
//!
//! Turns operational signals into a deduplicated, ranked queue of
//! recommended actions per scope, runs user-triggered delivery actions
//! against that queue with an audit trail, and attributes their effect.

pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
mod migrations;
pub mod nba;
pub mod signals;
pub mod types;

pub use error::{DeliveryError, NbaError};
