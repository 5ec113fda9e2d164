//! Clock port.
//!
//! Every due-condition compares a stored timestamp with "now"; reading it
//! through this port lets tests pin the instant a pass runs at.

use crate::domain::foundation::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
