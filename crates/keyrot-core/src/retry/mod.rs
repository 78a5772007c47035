//! Bounded retry with backoff
//!
//! Lock acquisition goes through here: contention is retried up to the
//! policy's attempt limit with a delay between attempts, anything else is
//! returned at once. The caller always gets the last error back unchanged.
//!
//! # Example
//!
//! ```rust,no_run
//! use keyrot_core::retry::{RetryExecutorBuilder, TracingObserver};
//! use keyrot_core::{ErrorKind, RetryPolicy};
//!
//! async fn example() -> keyrot_core::Result<&'static str> {
//!     let executor = RetryExecutorBuilder::new()
//!         .with_policy(RetryPolicy::default())
//!         .with_observer(TracingObserver::new("acquire-lock"))
//!         .build();
//!
//!     executor
//!         .execute(
//!             |e: &keyrot_core::Error| e.kind() == ErrorKind::LockContention,
//!             || async { Ok("locked") },
//!         )
//!         .await
//! }
//! ```

mod backoff;
mod executor;
mod observer;

pub use backoff::backoff_delay;
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use observer::{AttemptObserver, SilentObserver, TracingObserver};
