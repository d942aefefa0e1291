//! Hivemind Test - Shared test utilities for the Hivemind context store.
//!
//! Fixtures build managers over each in-process backend; mocks wrap or
//! replace a backend to observe or break it.
//!
//! ```toml
//! [dev-dependencies]
//! hivemind-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use hivemind_test::{FailingBackend, memory_manager, sample_data};
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let manager = memory_manager();
//!     let id = manager.create_context(NewContext::new(sample_data())).await.unwrap();
//!     assert!(manager.get_context(&id).await.is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
