//! Database access for the classification engine
//!
//! Bootstrap and catalog models live in `batcall_common::db`; this module
//! holds the queries the engine runs.

pub mod catalog;
pub mod results;
pub mod runs;

pub use batcall_common::db::init_database;
