//! Application services: paginated reads and cache-aware writes.

pub mod commands;
pub mod error;
pub mod listing;
pub mod pagination;
pub mod repos;
