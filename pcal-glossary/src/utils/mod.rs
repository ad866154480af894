//! Utility modules for pcal-glossary

pub mod retry;

pub use retry::{retry_with_backoff, RetryFailure};
