//! Core domain types shared across the crate.

pub mod ids;

pub use ids::{CorrelationId, DeliveryId, IssueNumber, RepositoryId, Sha};
