//! Integration test suite for conductor.
//!
//! These tests drive the public API end to end: building task graphs,
//! validating them, planning, and executing plans with the simulated
//! runner.
//!
//! # Test Categories
//!
//! - `planning`: Validation and plan shape for the reference scenarios
//! - `properties`: Invariants checked over generated graphs
//! - `execution`: Running plans, failures, timeouts and progress

mod fixtures;

mod execution;
mod planning;
