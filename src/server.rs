//! Server context: the listener, the keyspace and connected clients, driven
//! by a single [`EventLoop`].

use crate::config::Config;
use crate::db::{unix_ms, Db, EXPIRE_SAMPLES};
use crate::error::{Error, Result};
use crate::network::socket;
use crate::network::client::{Client, ReadStatus};
use crate::protocol::Limits;
use crate::reactor::{EventHandler, EventLoop, Mask, TimerId, TimerKind};
use mio::net::TcpListener;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use tracing::{debug, error, info, trace, warn};

/// Hash table buckets migrated per cron tick
const REHASH_STEPS: usize = 100;

const MAX_CLIENTS_REPLY: &[u8] = b"-ERR max number of clients reached\r\n";

/// File event callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTask {
    Accept,
    ReadQuery,
    SendReply,
}

/// Timer callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTask {
    ServerCron,
}

pub type ServerLoop = EventLoop<FileTask, TimeTask>;

pub struct Server {
    config: Config,
    listener: TcpListener,
    limits: Limits,
    db: Db,
    clients: HashMap<RawFd, Client>,
}

impl Server {
    /// Validate `config` and bind the listening socket
    pub fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let listener = socket::listen(&config.bind_addr, config.port)?;
        info!("Listening on {}", listener.local_addr()?);

        let limits = Limits {
            max_inline: config.max_inline_len,
            max_bulk: config.max_bulk_len,
        };

        Ok(Self {
            config,
            listener,
            limits,
            db: Db::new(),
            clients: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Register the listener and the cron, then run `el` until it is stopped.
    pub fn run(&mut self, el: &mut ServerLoop) -> Result<()> {
        let fd = self.listener.as_raw_fd();
        if !el.register(fd, Mask::Readable, FileTask::Accept) {
            return Err(Error::Other(anyhow::anyhow!(
                "failed to register listener fd {}",
                fd
            )));
        }
        el.schedule_timer(
            TimerKind::Repeat,
            self.config.cron_interval_ms,
            TimeTask::ServerCron,
        );

        el.run(self);

        self.shutdown(el);
        Ok(())
    }

    fn shutdown(&mut self, el: &mut ServerLoop) {
        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            self.free_client(el, fd);
        }
        el.unregister(self.listener.as_raw_fd(), Mask::Readable);
        info!("Server shutdown complete");
    }

    fn accept_clients(&mut self, el: &mut ServerLoop) {
        loop {
            let (mut stream, addr) = match socket::accept(&self.listener) {
                Ok(Some(conn)) => conn,
                Ok(None) => break,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            };

            if self.clients.len() >= self.config.max_clients {
                warn!("Rejecting {}: max clients ({}) reached", addr, self.config.max_clients);
                let _ = socket::write(&mut stream, MAX_CLIENTS_REPLY);
                socket::close(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let client = Client::new(stream, addr, self.limits);
            let fd = client.fd();
            if !el.register(fd, Mask::Readable, FileTask::ReadQuery) {
                client.close();
                continue;
            }

            debug!("New connection from {} on fd {}", addr, fd);
            self.clients.insert(fd, client);
        }
    }

    fn read_query(&mut self, el: &mut ServerLoop, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };

        match client.read_and_process(&mut self.db) {
            Ok(status) => {
                if client.has_pending_replies() && !el.is_registered(fd, Mask::Writable) {
                    el.register(fd, Mask::Writable, FileTask::SendReply);
                }
                // A backlogged client is rearmed once its replies drain.
                if status == ReadStatus::Throttled && !client.is_backlogged() {
                    el.rearm(fd);
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Client {} closed the connection", client.addr());
                self.free_client(el, fd);
            }
            Err(e @ Error::Protocol(_)) => {
                debug!("Protocol error from {}: {}", client.addr(), e);
                client.write_error(&e);
                self.free_client(el, fd);
            }
            Err(e) => {
                debug!("Error reading from {}: {}", client.addr(), e);
                self.free_client(el, fd);
            }
        }
    }

    fn send_reply(&mut self, el: &mut ServerLoop, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };

        match client.send_replies() {
            Ok(true) => {
                let close = client.should_close();
                el.unregister(fd, Mask::Writable);
                if close {
                    self.free_client(el, fd);
                } else {
                    // Input may have been left unread while replies backed up.
                    el.rearm(fd);
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!("Error writing to {}: {}", client.addr(), e);
                self.free_client(el, fd);
            }
        }
    }

    /// Drop every registration for `fd` before closing the socket.
    fn free_client(&mut self, el: &mut ServerLoop, fd: RawFd) {
        el.unregister(fd, Mask::Readable);
        el.unregister(fd, Mask::Writable);
        if let Some(client) = self.clients.remove(&fd) {
            debug!("Closing connection {} on fd {}", client.addr(), fd);
            client.close();
        }
    }

    fn server_cron(&mut self) {
        let expired = self.db.active_expire_cycle(EXPIRE_SAMPLES, unix_ms());
        self.db.rehash_tick(REHASH_STEPS);
        trace!(
            "Cron: {} keys, {} volatile, {} expired, {} clients",
            self.db.len(),
            self.db.expires(),
            expired,
            self.clients.len()
        );
    }
}

impl EventHandler<FileTask, TimeTask> for Server {
    fn on_file_event(&mut self, el: &mut ServerLoop, fd: RawFd, _mask: Mask, task: FileTask) {
        match task {
            FileTask::Accept => self.accept_clients(el),
            FileTask::ReadQuery => self.read_query(el, fd),
            FileTask::SendReply => self.send_reply(el, fd),
        }
    }

    fn on_time_event(&mut self, _el: &mut ServerLoop, _id: TimerId, task: TimeTask) {
        match task {
            TimeTask::ServerCron => self.server_cron(),
        }
    }
}
