//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, the state machine trait and error
//! types that form the vocabulary of the billing domain.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{CampaignId, CustomerId, ProductId, StateChangeId, SubscriptionId, WorkspaceId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
