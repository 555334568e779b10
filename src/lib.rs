// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod runner;
pub mod sentiment;

// ---- Re-exports for stable public API ----
pub use crate::error::HarvestError;
pub use crate::ingest::harvest::{HarvestReport, Harvester, StopReason};
