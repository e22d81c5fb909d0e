use crate::collections::DictError;
use crate::protocol::ProtocolError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Dict error: {0}")]
    Dict(#[from] DictError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error ends the connection that produced it.
    ///
    /// Every I/O and protocol failure is terminal for a client; dict errors
    /// are logical outcomes the caller is expected to branch on.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Error::Dict(_) | Error::Config(_))
    }

    /// Convert error to a RESP error line
    pub fn to_resp(&self) -> Vec<u8> {
        format!("-ERR {}\r\n", self).into_bytes()
    }
}
