//! Delivery: running user-facing actions against queue rows.

pub mod handlers;
pub mod registry;
pub mod runner;
pub mod sanitize;
pub mod services;

pub use registry::{default_registry, ActionKey, DeliveryAction, DeliveryContext, DeliveryRegistry};
pub use runner::{DeliveryRequest, DeliveryResult, DeliveryRunner};
pub use services::{DeliveryServices, NoopServices};
