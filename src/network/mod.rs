//! Sockets and per-connection state

pub mod client;
pub mod socket;

pub use client::Client;
