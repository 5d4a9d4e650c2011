//! Core domain types for tellus.

pub mod command;
pub mod ids;

pub use command::CommandKind;
pub use ids::{DeliveryId, InvalidRepoName, InvalidSha, PrNumber, RepoId, Sha};
