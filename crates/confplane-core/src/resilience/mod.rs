//! Generic resilience helpers shared by store-facing components.

pub mod retry;

pub use retry::{retry, RetryConfig};
