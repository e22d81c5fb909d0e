//! Client wire protocol: inbound query parsing and outbound replies

pub mod query;
pub mod reply;

pub use query::{Limits, QueryParser};
pub use reply::ReplyQueue;

use thiserror::Error;

/// Malformed client input. Every variant ends the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("too big inline request ({0} bytes without terminator)")]
    InlineTooBig(usize),

    #[error("invalid multibulk length")]
    InvalidMultibulkLen,

    #[error("multibulk length {0} exceeds limit")]
    MultibulkTooBig(i64),

    #[error("expected '$', got '{0}'")]
    ExpectedBulkLen(char),

    #[error("invalid bulk length")]
    InvalidBulkLen,

    #[error("bulk length {0} exceeds limit")]
    BulkTooBig(usize),

    #[error("missing CRLF after bulk data")]
    MissingBulkTerminator,
}
