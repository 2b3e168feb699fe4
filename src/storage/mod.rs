//! Persistence: artifact paths, usage record schema and store.

pub mod paths;
pub mod schema;
pub mod store;
