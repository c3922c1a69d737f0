//! PROFITSWITCH: per-algorithm most-profitable-coin selector.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod registry;
pub mod exchanges;
pub mod daemon;
pub mod control;
pub mod engine;
pub mod dashboard;
