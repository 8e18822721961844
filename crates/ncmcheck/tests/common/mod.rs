//! Shared test utilities for ncmcheck integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against an on-disk database
//! - Builders for record lists and config files
//! - Scripted classifiers that answer per code and record their calls

pub mod builders;
pub mod classifiers;
pub mod harness;

pub use builders::*;
pub use classifiers::*;
pub use harness::TestHarness;
