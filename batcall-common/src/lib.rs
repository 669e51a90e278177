//! # Batcall Common Library
//!
//! Shared code for the batcall services:
//! - Error type used across crates
//! - Engine configuration loading (CLI → ENV → TOML → defaults)
//! - Database bootstrap and row models

pub mod config;
pub mod db;
pub mod error;

pub use config::{EngineConfig, PathMapping};
pub use error::{Error, Result};
