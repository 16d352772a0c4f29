//! File-backed repository implementations.

pub mod csv;

pub use csv::{CsvCredentialStore, CsvTokenRepository};
