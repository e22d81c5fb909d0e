//! godis-rs: a small single-threaded Redis-compatible key-value server
//!
//! # Architecture
//!
//! - One `mio`-backed reactor driving file events and timers
//! - Incrementally rehashing hash table for the keyspace
//! - Resumable parser for inline and multibulk requests
//! - Per-connection reply queues flushed on writable readiness

/// Linked list and incrementally rehashing dict
pub mod collections;

/// Command table and handlers
pub mod command;

/// Configuration management for the server
pub mod config;

/// Keyspace with key expiry
pub mod db;

/// Error types and result aliases
pub mod error;

/// Sockets and per-connection state
pub mod network;

/// Reference-counted value objects
pub mod object;

/// Request parsing and reply encoding
pub mod protocol;

/// Event loop
pub mod reactor;

/// Server context and callbacks
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use reactor::{EventLoop, StopHandle};
pub use server::{Server, ServerLoop};
