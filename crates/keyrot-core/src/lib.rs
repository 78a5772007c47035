//! # keyrot-core
//!
//! Core library for keyrot providing:
//! - Session configuration parsing (keyrot.yaml)
//! - The error taxonomy shared by every rotation component
//! - Retry execution engine with policy-based configuration

pub mod config;
pub mod error;
pub mod retry;
pub mod types;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Error, ErrorDetail, ErrorKind, Result};
pub use types::{ExecutionStrategy, RetryPolicy, RetryStrategy};
