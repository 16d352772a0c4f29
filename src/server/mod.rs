//! TCP server: listener, per-connection handler and moderation commands.

pub mod handler;
pub mod moderation;
pub mod runner;
pub mod signal;
pub mod state;

pub use runner::{run_server, serve};
pub use state::AppState;
