//! Delegation redeemer adapters.

mod http_redeemer;
mod mock;

pub use http_redeemer::{HttpDelegationRedeemer, HttpRedeemerConfig};
pub use mock::MockDelegationRedeemer;
