//! Email adapters.
//!
//! - `ResendEmailService` - Delivers through the Resend HTTP API
//! - `RecordingEmailService` - Keeps messages in memory

mod recording;
mod resend;

pub use recording::RecordingEmailService;
pub use resend::{ResendConfig, ResendEmailService};
