//! In-memory adapters for tests and local runs.

mod subscription_repository;

pub use subscription_repository::{InMemorySubscriptionRepository, RepoOperation};
