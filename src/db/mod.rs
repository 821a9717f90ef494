//! Database module: entity models and SQL repositories.
//!
//! - `model`: typed domain entities returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `meli_resolver::db` — we re-export
//! the repository API and the models for convenience.

pub mod model;
pub mod repo;

pub use model::{MarketplaceAccount, SyncStatus};
pub use repo::*;
