//! Shared test utilities for caseflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution against a temp database
//! - Builders for configurations and spreadsheet uploads

pub mod builders;
pub mod harness;

#[allow(unused_imports)]
pub use builders::*;
#[allow(unused_imports)]
pub use harness::TestHarness;
