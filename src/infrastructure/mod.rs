//! Infrastructure implementations of the domain ports: file-backed
//! repositories and the HTTP text-generation client.

pub mod generator;
pub mod repository;

pub use generator::HttpTextGenerator;
pub use repository::{CsvCredentialStore, CsvTokenRepository};
