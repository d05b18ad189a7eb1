//! Layered caching, mutation-driven invalidation, and keyset pagination for
//! article listings.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
