//! Next-best-action engine.
//!
//! A pass reads operational signals for one scope ([`context`]), runs the
//! rule set over them ([`rules`]), drops suppressed output ([`preferences`]),
//! scores and orders what is left ([`ranking`]) and persists it
//! ([`queue`]). [`engine`] wires the pass together; [`attribution`] and
//! [`explain`] serve the delivery runner and the read side.

pub mod attribution;
pub mod context;
pub mod engine;
pub mod explain;
pub mod preferences;
pub mod queue;
pub mod ranking;
pub mod rules;

pub use context::{build_context, GrowthContext, NextActionContext};
pub use engine::{evaluate_and_upsert, EvaluationReport};
pub use explain::{explain_action, ActionExplanation};
pub use queue::{QueueSummary, Transition, UpsertSummary};
