//! # pcal Common Library
//!
//! Shared code for the pcal plant-name tooling:
//! - Common error type
//! - Locale codes and their canonical form
//! - Layered configuration (CLI → ENV → TOML → defaults)
//! - Logging initialization

pub mod config;
pub mod error;
pub mod locale;
pub mod logging;

pub use error::{Error, Result};
pub use locale::LocaleCode;
