//! Reply encoding and the per-connection outbound queue.

use crate::collections::List;
use crate::network::socket::{self, Transfer};
use crate::object::{Object, Robj};
use bytes::{BufMut, BytesMut};
use std::io::{self, Write};
use std::rc::Rc;
use tracing::trace;

/// Encode a simple string reply: `+msg\r\n`
pub fn simple(msg: &str) -> Robj {
    let mut buf = BytesMut::with_capacity(msg.len() + 3);
    buf.put_u8(b'+');
    buf.put_slice(msg.as_bytes());
    buf.put_slice(b"\r\n");
    Object::string(buf.freeze())
}

pub fn ok() -> Robj {
    Object::string(&b"+OK\r\n"[..])
}

/// Encode an error reply: `-ERR msg\r\n`
pub fn error(msg: &str) -> Robj {
    let mut buf = BytesMut::with_capacity(msg.len() + 7);
    buf.put_slice(b"-ERR ");
    buf.put_slice(msg.as_bytes());
    buf.put_slice(b"\r\n");
    Object::string(buf.freeze())
}

pub fn integer(n: i64) -> Robj {
    let mut num_buf = itoa::Buffer::new();
    let digits = num_buf.format(n);
    let mut buf = BytesMut::with_capacity(digits.len() + 3);
    buf.put_u8(b':');
    buf.put_slice(digits.as_bytes());
    buf.put_slice(b"\r\n");
    Object::string(buf.freeze())
}

/// Encode a bulk reply: `$len\r\ndata\r\n`
pub fn bulk(data: &[u8]) -> Robj {
    let mut num_buf = itoa::Buffer::new();
    let len_str = num_buf.format(data.len());
    let mut buf = BytesMut::with_capacity(data.len() + len_str.len() + 5);
    buf.put_u8(b'$');
    buf.put_slice(len_str.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    Object::string(buf.freeze())
}

pub fn null_bulk() -> Robj {
    Object::string(&b"$-1\r\n"[..])
}

/// Encoded replies waiting to be written, oldest first.
///
/// `sent` counts the bytes of the head reply already written, so a short
/// write resumes mid-reply on the next writable event.
pub struct ReplyQueue {
    replies: List<Robj>,
    sent: usize,
}

impl ReplyQueue {
    pub fn new() -> Self {
        Self {
            replies: List::with_eq(Rc::ptr_eq),
            sent: 0,
        }
    }

    pub fn push(&mut self, reply: Robj) {
        self.replies.push_back(reply);
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Bytes of the head reply already written
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Write queued replies until the queue empties or `dst` stops taking
    /// bytes. Returns true once everything has been written.
    pub fn drain<W: Write>(&mut self, dst: &mut W) -> io::Result<bool> {
        while let Some(head) = self.replies.first() {
            let Some(reply) = self.replies.get(head) else {
                break;
            };
            let data = reply.to_bytes();

            if self.sent < data.len() {
                match socket::write(dst, &data[self.sent..])? {
                    Transfer::Done(n) => {
                        self.sent += n;
                        trace!("Wrote {} reply bytes", n);
                    }
                    Transfer::WouldBlock | Transfer::Eof => return Ok(false),
                }
            }

            if self.sent < data.len() {
                return Ok(false);
            }
            self.replies.remove(head);
            self.sent = 0;
        }

        self.sent = 0;
        Ok(true)
    }

    /// Release every queued reply
    pub fn clear(&mut self) {
        self.replies.clear();
        self.sent = 0;
    }
}

impl Default for ReplyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    /// Accepts at most `budget` bytes per call, and would-block after
    /// `calls` writes.
    struct Throttled {
        out: Vec<u8>,
        budget: usize,
        calls: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.calls == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            self.calls -= 1;
            let n = buf.len().min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_encodings() {
        assert_eq!(simple("PONG").as_bytes(), Some(&b"+PONG\r\n"[..]));
        assert_eq!(ok().as_bytes(), Some(&b"+OK\r\n"[..]));
        assert_eq!(error("boom").as_bytes(), Some(&b"-ERR boom\r\n"[..]));
        assert_eq!(integer(-7).as_bytes(), Some(&b":-7\r\n"[..]));
        assert_eq!(bulk(b"hello").as_bytes(), Some(&b"$5\r\nhello\r\n"[..]));
        assert_eq!(bulk(b"").as_bytes(), Some(&b"$0\r\n\r\n"[..]));
        assert_eq!(null_bulk().as_bytes(), Some(&b"$-1\r\n"[..]));
    }

    #[test]
    fn test_full_drain_in_order() {
        let mut queue = ReplyQueue::new();
        queue.push(ok());
        queue.push(integer(3));
        let mut out = Vec::new();
        assert!(queue.drain(&mut out).unwrap());
        assert_eq!(out, b"+OK\r\n:3\r\n");
        assert!(queue.is_empty());
        assert_eq!(queue.sent(), 0);
    }

    #[test]
    fn test_short_write_resumes_at_offset() {
        let mut queue = ReplyQueue::new();
        queue.push(bulk(b"hello"));
        queue.push(ok());

        let mut dst = Throttled {
            out: Vec::new(),
            budget: 4,
            calls: 1,
        };
        assert!(!queue.drain(&mut dst).unwrap());
        assert_eq!(queue.sent(), 4);
        assert_eq!(queue.len(), 2);

        dst.budget = 64;
        dst.calls = 1;
        assert!(!queue.drain(&mut dst).unwrap());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.sent(), 0);

        dst.calls = 1;
        assert!(queue.drain(&mut dst).unwrap());
        assert_eq!(dst.out, b"$5\r\nhello\r\n+OK\r\n");
    }

    #[test]
    fn test_drained_replies_are_released() {
        let reply = ok();
        let mut queue = ReplyQueue::new();
        queue.push(Rc::clone(&reply));
        assert_eq!(Rc::strong_count(&reply), 2);
        queue.drain(&mut Vec::new()).unwrap();
        assert_eq!(Rc::strong_count(&reply), 1);
    }

    #[test]
    fn test_hard_error_propagates() {
        let mut queue = ReplyQueue::new();
        queue.push(ok());
        assert!(queue.drain(&mut Broken).is_err());
        assert_eq!(queue.len(), 1);
    }
}
