use crate::command::{self, Outcome};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::network::socket::{self, Transfer};
use crate::protocol::{Limits, QueryParser, ReplyQueue};
use mio::net::TcpStream;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use tracing::trace;

/// Bytes requested from the socket per read call
const IO_BUF_LEN: usize = 16 * 1024;

/// Socket reads performed for one readable event
const MAX_READS_PER_EVENT: usize = 16;

/// Queued replies above which reading pauses until the queue drains
pub const MAX_PENDING_REPLIES: usize = 1024;

/// Why `read_and_process` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The socket would block
    Drained,
    /// Stopped with input possibly left unread; the caller must re-arm
    /// read readiness once it wants more.
    Throttled,
}

/// One accepted connection: its socket, the partially parsed request and the
/// replies not yet written back.
pub struct Client {
    fd: RawFd,
    stream: TcpStream,
    addr: SocketAddr,
    query: QueryParser,
    replies: ReplyQueue,
    close_after_reply: bool,
}

impl Client {
    pub fn new(stream: TcpStream, addr: SocketAddr, limits: Limits) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream,
            addr,
            query: QueryParser::new(limits),
            replies: ReplyQueue::new(),
            close_after_reply: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.replies.is_empty()
    }

    /// Set once a command asked for the connection to end after its reply
    pub fn should_close(&self) -> bool {
        self.close_after_reply
    }

    /// Whether queued replies have reached the point where reading pauses
    pub fn is_backlogged(&self) -> bool {
        self.replies.len() >= MAX_PENDING_REPLIES
    }

    /// Read and run every complete request until the socket would block,
    /// the per-event read budget is spent, or the reply queue backs up.
    ///
    /// Returns `Error::ConnectionClosed` when the peer hung up, and the
    /// parser's error for malformed input. Both end the connection.
    pub fn read_and_process(&mut self, db: &mut Db) -> Result<ReadStatus> {
        let mut buf = [0u8; IO_BUF_LEN];
        for _ in 0..MAX_READS_PER_EVENT {
            if self.close_after_reply {
                return Ok(ReadStatus::Drained);
            }
            if self.is_backlogged() {
                trace!("Reply backlog on fd {}, pausing reads", self.fd);
                return Ok(ReadStatus::Throttled);
            }
            match socket::read(&mut self.stream, &mut buf)? {
                Transfer::Done(n) => {
                    trace!("Read {} bytes from fd {}", n, self.fd);
                    self.query.feed(&buf[..n]);
                    self.process_query(db)?;
                }
                Transfer::WouldBlock => return Ok(ReadStatus::Drained),
                Transfer::Eof => return Err(Error::ConnectionClosed),
            }
        }
        Ok(ReadStatus::Throttled)
    }

    /// Execute every complete request buffered so far
    fn process_query(&mut self, db: &mut Db) -> Result<()> {
        while let Some(args) = self.query.next_command()? {
            if args.is_empty() {
                continue;
            }
            if command::execute(db, &args, &mut self.replies)? == Outcome::CloseAfterReply {
                self.close_after_reply = true;
                break;
            }
        }
        Ok(())
    }

    /// Write queued replies; true once the queue is empty.
    pub fn send_replies(&mut self) -> io::Result<bool> {
        self.replies.drain(&mut self.stream)
    }

    /// Best-effort error line ahead of closing
    pub fn write_error(&mut self, err: &Error) {
        let _ = socket::write(&mut self.stream, &err.to_resp());
    }

    /// Release queued replies and any partial request, then close the socket.
    pub fn close(mut self) {
        self.replies.clear();
        self.query.reset();
        socket::close(self.stream);
    }
}
