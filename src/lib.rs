//! VIGIL: budget-aware analysis scheduler with a virtual portfolio ledger.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod engine;
pub mod portfolio;
pub mod gateway;
pub mod feed;
pub mod storage;
pub mod dashboard;
