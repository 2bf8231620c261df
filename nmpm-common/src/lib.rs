//! # nmpm Common Library
//!
//! Shared code for the nmpm playlist builder and its command-line tools:
//! - Common error type
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;

pub use error::{Error, Result};
