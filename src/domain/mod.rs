//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine trait)
//! - `billing` - Subscriptions, dunning campaigns and the audit log

pub mod billing;
pub mod foundation;
