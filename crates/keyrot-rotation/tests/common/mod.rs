//! Common test utilities for keyrot-rotation
//!
//! This module provides shared test infrastructure including:
//! - A sandboxed store/keyring/backup layout with an initialized keyring
//! - A failure-injecting crypto primitive
//! - Assertion helpers for rotation outcomes

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::*;
pub use fixtures::*;
pub use mocks::*;
