//! Shared utilities for fabric-gitops integration tests.
//!
//! This module provides:
//! - `TestHarness`: a fabric in a throwaway Git working copy, backed by an
//!   in-memory registry and an in-memory cluster
//! - builders for the manifests the tests push around

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{test_config, TestHarness};
