//! Integration test crate for Hivemind.
//!
//! This crate exists solely for integration testing. It is `publish = false`
//! and has no library code; all tests live in `tests/`.
//!
//! Cache-backend tests run only when `HIVEMIND_TEST_REDIS_URL` points at a
//! disposable Redis database.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
