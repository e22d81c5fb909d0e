// End-to-end tests: boot a server on an ephemeral port in its own thread and
// talk to it over a real TCP socket.
use godis_rs::{Config, Server, ServerLoop, StopHandle};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Running {
    addr: SocketAddr,
    stop: StopHandle,
    thread: JoinHandle<()>,
}

impl Running {
    fn start(config: Config) -> Self {
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut el = ServerLoop::new().expect("event loop");
            let mut server = Server::new(config).expect("server");
            let addr = server.local_addr().expect("local addr");
            tx.send((addr, el.stop_handle())).expect("handshake");
            server.run(&mut el).expect("run");
        });
        let (addr, stop) = rx.recv().expect("server started");
        Running { addr, stop, thread }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        stream
    }

    fn shutdown(self) {
        self.stop.stop();
        self.thread.join().expect("server thread");
    }
}

fn ephemeral() -> Config {
    Config {
        port: 0,
        ..Default::default()
    }
}

fn expect_reply(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).expect("reply");
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

fn expect_eof(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).expect("eof");
    assert!(rest.is_empty(), "unexpected trailing bytes {:?}", rest);
}

// Test: inline PING round-trips through the reactor.
#[test]
fn ping_inline() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();

    conn.write_all(b"PING\r\n").unwrap();
    expect_reply(&mut conn, b"+PONG\r\n");

    server.shutdown();
}

// Test: pipelined multibulk SET and GET, including a request split across
// two writes.
#[test]
fn set_get_multibulk_pipelined() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();

    conn.write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nva").unwrap();
    thread::sleep(Duration::from_millis(20));
    conn.write_all(b"lue\r\n*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
    expect_reply(&mut conn, b"+OK\r\n$5\r\nvalue\r\n");

    conn.write_all(b"DEL name\r\nGET name\r\n").unwrap();
    expect_reply(&mut conn, b":1\r\n$-1\r\n");

    server.shutdown();
}

// Test: the keyspace is shared by every connection.
#[test]
fn keys_visible_across_connections() {
    let server = Running::start(ephemeral());
    let mut a = server.connect();
    let mut b = server.connect();

    a.write_all(b"SET shared 1\r\n").unwrap();
    expect_reply(&mut a, b"+OK\r\n");
    b.write_all(b"GET shared\r\n").unwrap();
    expect_reply(&mut b, b"$1\r\n1\r\n");

    server.shutdown();
}

// Test: QUIT replies and then the server closes the connection.
#[test]
fn quit_closes_after_reply() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();

    conn.write_all(b"QUIT\r\n").unwrap();
    expect_reply(&mut conn, b"+OK\r\n");
    expect_eof(&mut conn);

    server.shutdown();
}

// Test: malformed input gets an error line and the connection is dropped.
#[test]
fn protocol_error_closes_connection() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();

    conn.write_all(b"*1\r\n$x\r\n").unwrap();
    expect_reply(&mut conn, b"-ERR Protocol error: invalid bulk length\r\n");
    expect_eof(&mut conn);

    server.shutdown();
}

// Test: connections beyond max_clients are rejected with an error line.
#[test]
fn max_clients_rejects_extra_connection() {
    let server = Running::start(Config {
        max_clients: 1,
        ..ephemeral()
    });
    let mut first = server.connect();
    first.write_all(b"PING\r\n").unwrap();
    expect_reply(&mut first, b"+PONG\r\n");

    let mut second = server.connect();
    expect_reply(&mut second, b"-ERR max number of clients reached\r\n");
    expect_eof(&mut second);

    first.write_all(b"PING\r\n").unwrap();
    expect_reply(&mut first, b"+PONG\r\n");

    server.shutdown();
}

// Test: an expired key disappears once its deadline passes.
#[test]
fn expire_removes_key() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();

    conn.write_all(b"SET temp v\r\nEXPIRE temp 1\r\n").unwrap();
    expect_reply(&mut conn, b"+OK\r\n:1\r\n");
    thread::sleep(Duration::from_millis(1200));
    conn.write_all(b"GET temp\r\nTTL temp\r\n").unwrap();
    expect_reply(&mut conn, b"$-1\r\n:-2\r\n");

    server.shutdown();
}

// Test: a pipeline deep enough to back up the reply queue is still answered
// in full, and other clients are served meanwhile.
#[test]
fn deep_pipeline_is_answered_in_full() {
    let server = Running::start(ephemeral());
    let mut conn = server.connect();
    let mut other = server.connect();

    let pings = 5000;
    conn.write_all(&b"PING\r\n".repeat(pings)).unwrap();
    other.write_all(b"PING\r\n").unwrap();
    expect_reply(&mut other, b"+PONG\r\n");

    let mut replies = vec![0u8; pings * b"+PONG\r\n".len()];
    conn.read_exact(&mut replies).unwrap();
    assert!(replies.chunks(7).all(|r| r == b"+PONG\r\n"));

    conn.write_all(b"ECHO done\r\n").unwrap();
    expect_reply(&mut conn, b"$4\r\ndone\r\n");

    server.shutdown();
}
