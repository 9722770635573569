//! Shared test utilities for logsift integration tests.
//!
//! This module provides:
//! - `TestHarness` for an isolated queue, store and input directory
//! - Builders for configs and log file contents

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
