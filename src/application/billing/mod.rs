//! Billing scheduler core.
//!
//! # Module Structure
//!
//! - `scheduler` - Background worker and the per-pass stage pipeline
//! - `lifecycle_transitioner` - Scheduled cancellations and resumptions
//! - `dunning_engine` - Final actions for exhausted dunning campaigns
//! - `payment_retry` - Delegation redemption for campaigns due a retry
//! - `notification_gateway` - Templated lifecycle emails
//! - `report` - Per-pass and per-stage results

mod dunning_engine;
mod lifecycle_transitioner;
mod notification_gateway;
mod payment_retry;
mod report;
mod scheduler;

pub use dunning_engine::DunningEngine;
pub use lifecycle_transitioner::LifecycleTransitioner;
pub use notification_gateway::{Delivery, NotificationGateway, NotificationKind};
pub use payment_retry::{idempotency_key, PaymentRetryProcessor};
pub use report::{PassReport, Stage, StageOutcome, StageReport};
pub use scheduler::{ChangeProcessor, Scheduler, SchedulerConfig, SchedulerError};
