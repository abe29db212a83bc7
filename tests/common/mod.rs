//! Shared test utilities for chatlog integration harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file.

#![allow(dead_code, unused_imports)]

pub mod assertions;
pub mod builders;
pub mod fake_log_service;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
