//! MetaVol Common - Shared types and utilities
//!
//! This crate provides the common types, error definitions, and configuration
//! used across the MetaVol metadata-volume layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::MetaVolConfig;
pub use error::{Error, Result};
pub use types::*;
