//! Telemetry infrastructure for drifter services.
//!
//! This crate provides the logging bootstrap shared by the daemon binary and
//! the test suites. It integrates with the `tracing` ecosystem for structured
//! logging: human-readable output for interactive use, JSON output for log
//! shippers.

pub mod logging;
