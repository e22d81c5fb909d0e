//! Incremental request parser.
//!
//! Bytes arrive in arbitrary fragments. The parser keeps everything it has not
//! consumed yet plus enough state (request type, elements left, pending bulk
//! length) to resume exactly where the previous read stopped.
//!
//! Two encodings are accepted, chosen by the first byte of each request:
//! - inline: `PING\r\n`, tokens split on whitespace
//! - multibulk: `*2\r\n$3\r\nGET\r\n$1\r\nk\r\n`

use super::ProtocolError;
use crate::object::{Object, Robj};
use bytes::BytesMut;
use memchr::memmem;
use std::str;
use tracing::trace;

/// Upper bound on the element count of one multibulk request
const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// Argument slots reserved from the `*<count>` header alone
const MAX_ARGS_PREALLOC: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestType {
    Unknown,
    Inline,
    Multibulk,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Longest unterminated line tolerated
    pub max_inline: usize,
    /// Largest bulk element
    pub max_bulk: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_inline: 4 * 1024,
            max_bulk: 4 * 1024,
        }
    }
}

pub struct QueryParser {
    buffer: BytesMut,
    req_type: RequestType,
    // None until the `*<count>` header of the current request is read
    multibulk_left: Option<usize>,
    bulk_len: Option<usize>,
    args: Vec<Robj>,
    limits: Limits,
}

impl QueryParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            req_type: RequestType::Unknown,
            multibulk_left: None,
            bulk_len: None,
            args: Vec::new(),
            limits,
        }
    }

    /// Append freshly read bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not consumed by a complete request
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next complete request.
    ///
    /// `Ok(None)` means more input is needed; the partial state is kept.
    /// An empty vector is a complete but empty request (blank line, `*0`).
    pub fn next_command(&mut self) -> Result<Option<Vec<Robj>>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        if self.req_type == RequestType::Unknown {
            self.req_type = if self.buffer[0] == b'*' {
                RequestType::Multibulk
            } else {
                RequestType::Inline
            };
        }

        let complete = match self.req_type {
            RequestType::Inline => self.process_inline()?,
            RequestType::Multibulk => self.process_multibulk()?,
            RequestType::Unknown => false,
        };

        if complete {
            Ok(Some(self.finish()))
        } else {
            Ok(None)
        }
    }

    /// Drop any partially parsed request
    pub fn reset(&mut self) {
        self.req_type = RequestType::Unknown;
        self.multibulk_left = None;
        self.bulk_len = None;
        self.args.clear();
    }

    fn finish(&mut self) -> Vec<Robj> {
        let args = std::mem::take(&mut self.args);
        self.reset();
        trace!("Parsed request with {} args", args.len());
        args
    }

    /// Offset of the first CRLF, enforcing the inline length limit while
    /// none is buffered.
    fn find_line(&self) -> Result<Option<usize>, ProtocolError> {
        match memmem::find(&self.buffer, b"\r\n") {
            Some(pos) => Ok(Some(pos)),
            None if self.buffer.len() > self.limits.max_inline => {
                Err(ProtocolError::InlineTooBig(self.buffer.len()))
            }
            None => Ok(None),
        }
    }

    fn process_inline(&mut self) -> Result<bool, ProtocolError> {
        let Some(end) = self.find_line()? else {
            return Ok(false);
        };

        let line = self.buffer.split_to(end + 2).freeze();
        self.args = line[..end]
            .split(u8::is_ascii_whitespace)
            .filter(|tok| !tok.is_empty())
            .map(|tok| Object::string(line.slice_ref(tok)))
            .collect();
        Ok(true)
    }

    fn process_multibulk(&mut self) -> Result<bool, ProtocolError> {
        let mut left = match self.multibulk_left {
            Some(left) => left,
            None => {
                let Some(end) = self.find_line()? else {
                    return Ok(false);
                };
                let count = parse_int(&self.buffer[1..end]).ok_or(ProtocolError::InvalidMultibulkLen)?;
                let _ = self.buffer.split_to(end + 2);
                if count > MAX_MULTIBULK_LEN {
                    return Err(ProtocolError::MultibulkTooBig(count));
                }
                if count <= 0 {
                    return Ok(true);
                }
                self.args.reserve((count as usize).min(MAX_ARGS_PREALLOC));
                count as usize
            }
        };

        while left > 0 {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(end) = self.find_line()? else {
                        self.multibulk_left = Some(left);
                        return Ok(false);
                    };
                    if self.buffer[0] != b'$' {
                        return Err(ProtocolError::ExpectedBulkLen(self.buffer[0] as char));
                    }
                    let len = parse_int(&self.buffer[1..end])
                        .filter(|n| *n >= 0)
                        .ok_or(ProtocolError::InvalidBulkLen)? as usize;
                    if len > self.limits.max_bulk {
                        return Err(ProtocolError::BulkTooBig(len));
                    }
                    let _ = self.buffer.split_to(end + 2);
                    self.bulk_len = Some(len);
                    len
                }
            };

            if self.buffer.len() < len + 2 {
                self.multibulk_left = Some(left);
                return Ok(false);
            }
            if &self.buffer[len..len + 2] != b"\r\n" {
                return Err(ProtocolError::MissingBulkTerminator);
            }

            let mut data = self.buffer.split_to(len + 2);
            data.truncate(len);
            self.args.push(Object::string(data.freeze()));
            self.bulk_len = None;
            left -= 1;
        }

        self.multibulk_left = Some(0);
        Ok(true)
    }
}

fn parse_int(digits: &[u8]) -> Option<i64> {
    str::from_utf8(digits).ok()?.parse().ok()
}
