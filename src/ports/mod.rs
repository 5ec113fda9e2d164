//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `SubscriptionRepository` - Subscriptions, dunning campaigns, state change log
//! - `EmailService` - Transactional email provider
//! - `DelegationRedeemer` - On-chain redemption of signed delegations
//! - `Clock` - Source of "now" for due-condition checks

mod clock;
mod delegation_redeemer;
mod email_service;
mod subscription_repository;

pub use clock::Clock;
pub use delegation_redeemer::{
    redeem_within, DelegationPayload, DelegationRedeemer, RedemptionError, RedemptionErrorCode,
    RedemptionRequest, SettlementReference,
};
pub use email_service::{EmailService, EmailTag, TransactionalEmail};
pub use subscription_repository::SubscriptionRepository;
