//! Zerotouch - zero-touch nginx deployment for campaign directories
//!
//! This library watches a campaigns root and keeps nginx in sync with it:
//! - Snapshots each campaign directory and classifies it (static, dynamic, framework)
//! - Synthesizes an nginx location block per deployable campaign
//! - Assembles blocks into a single versioned config file
//! - Validates the config with nginx before it goes live, atomically swaps it in,
//!   and rolls back to the last known good version when validation or reload fails
//! - Reports per-campaign outcomes for every scan cycle

pub mod admin;
pub mod campaign;
pub mod classifier;
pub mod config;
pub mod error;
pub mod reload;
pub mod report;
pub mod scanner;
pub mod store;
pub mod synth;
