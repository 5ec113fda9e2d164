//! Application layer - Orchestrates billing work across ports.
//!
//! Components depend only on port traits, so every stage can run against the
//! in-memory adapters in tests.

pub mod billing;

pub use billing::{
    ChangeProcessor, DunningEngine, LifecycleTransitioner, NotificationGateway, PassReport,
    PaymentRetryProcessor, Scheduler, SchedulerConfig, SchedulerError, Stage, StageOutcome,
    StageReport,
};
