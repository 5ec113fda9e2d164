//! Billing domain module.
//!
//! Subscription lifecycle and the dunning sub-state-machine.
//!
//! # Module Structure
//!
//! - `status` - SubscriptionStatus state machine
//! - `subscription` - Subscription entity and due-condition checks
//! - `dunning` - DunningCampaign, FinalAction and retry backoff
//! - `state_change` - Append-only audit records
//! - `transition` - Outcome of a single-row mutation

mod dunning;
mod state_change;
mod status;
mod subscription;
mod transition;

pub use dunning::{CampaignStatus, DunningCampaign, FinalAction, FinalActionTaken, RetrySchedule};
pub use state_change::{
    Initiator, StateChangeRecord, REASON_DUNNING_CANCELLATION, REASON_DUNNING_PAUSE,
    REASON_PAYMENT_RECOVERED, REASON_SCHEDULED_CANCELLATION, REASON_SCHEDULED_RESUMPTION,
};
pub use status::SubscriptionStatus;
pub use subscription::Subscription;
pub use transition::TransitionOutcome;
