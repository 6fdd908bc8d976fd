//! Configuration schema and SQLite-backed persistence.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
