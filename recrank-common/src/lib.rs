//! # recrank Common Library
//!
//! Shared code for the recrank workspace:
//! - Rating record type
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod rating;

pub use error::{Error, Result};
pub use rating::Rating;
