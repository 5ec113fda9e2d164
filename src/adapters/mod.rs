//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing core to external systems:
//! - `postgres` - Subscription and dunning persistence
//! - `memory` - In-memory repository for tests and local runs
//! - `email` - Resend delivery and a recording stand-in
//! - `redemption` - Delegation redemption over HTTP, plus a scripted mock
//! - `clock` - System and fixed clocks

pub mod clock;
pub mod email;
pub mod memory;
pub mod postgres;
pub mod redemption;

pub use clock::{FixedClock, SystemClock};
pub use email::{RecordingEmailService, ResendConfig, ResendEmailService};
pub use memory::{InMemorySubscriptionRepository, RepoOperation};
pub use postgres::PostgresSubscriptionRepository;
pub use redemption::{HttpDelegationRedeemer, HttpRedeemerConfig, MockDelegationRedeemer};
