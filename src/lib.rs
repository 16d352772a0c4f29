//! Multi-room TCP chat server library.
//!
//! This library provides the server-side engine for a line-oriented chat
//! protocol: token-based reconnectable sessions, a room registry with
//! broadcast fan-out, admin moderation commands, and AI-enabled rooms that
//! coalesce message bursts into batched text-generation calls.

// layers
pub mod ai;
pub mod auth;
pub mod domain;
pub mod infrastructure;
pub mod protocol;
pub mod rooms;
pub mod server;

// shared library
pub mod common;
