//! Thin non-blocking socket wrappers.
//!
//! `read` and `write` report would-block as a distinct outcome rather than an
//! error, so callers only ever see `Err` for conditions that end the
//! connection.

use mio::net::{TcpListener, TcpStream};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};

/// Outcome of a single non-blocking transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `n` bytes moved
    Done(usize),
    /// No progress possible right now
    WouldBlock,
    /// Peer closed the stream (reads only)
    Eof,
}

/// Bind a non-blocking listener on `bind_addr:port`
pub fn listen(bind_addr: &str, port: u16) -> io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind((bind_addr, port))?;
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(listener))
}

/// Accept one pending connection, `None` when the backlog is drained
pub fn accept(listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    loop {
        match listener.accept() {
            Ok(conn) => return Ok(Some(conn)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Start a non-blocking connect to `addr:port`
pub fn connect(addr: &str, port: u16) -> io::Result<TcpStream> {
    let target = (addr, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no address resolved"))?;
    TcpStream::connect(target)
}

pub fn read<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<Transfer> {
    loop {
        match src.read(buf) {
            Ok(0) => return Ok(Transfer::Eof),
            Ok(n) => return Ok(Transfer::Done(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

pub fn write<W: Write>(dst: &mut W, buf: &[u8]) -> io::Result<Transfer> {
    loop {
        match dst.write(buf) {
            Ok(0) if !buf.is_empty() => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => return Ok(Transfer::Done(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Transfer::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Shut the stream down and release the descriptor
pub fn close(stream: TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
}
