//! Git plumbing behind the fabric directory tree.

pub mod auth;
pub mod parse;
pub mod repository;
pub mod types;

pub use repository::{GitRepository, GitSettings};
pub use types::*;
