//! Test Helper Utilities
//!
//! Shared utilities for testing batcall-classify

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;
pub mod stub_service;

pub use audio_generator::{generate_test_wav, AudioConfig};
pub use db_utils::{create_model_file, create_test_db, seed_fixture, test_context, Fixture, FixtureSpec};
pub use stub_service::{StubClassifier, StubRequest, StubResponse};
