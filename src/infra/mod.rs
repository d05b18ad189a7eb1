//! Runtime adapters: storage, HTTP, and telemetry.

pub mod db;
pub mod error;
pub mod http;
pub mod memory_store;
pub mod telemetry;
