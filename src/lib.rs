//! Delegated Billing - recurring-billing scheduler
//!
//! A single background worker applies scheduled cancellations and
//! resumptions, retries failed delegation redemptions and carries out the
//! final action of exhausted dunning campaigns. Storage, email, redemption
//! and time sit behind ports so the core runs against Postgres in
//! production and in-memory doubles in tests.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
