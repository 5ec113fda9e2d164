//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresSubscriptionRepository` - Subscriptions, dunning campaigns and the state change log
//!
//! Schema lives in `migrations/`.

mod subscription_repository;

pub use subscription_repository::PostgresSubscriptionRepository;
