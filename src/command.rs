//! Command table and the handful of commands the server answers.

use crate::db::{unix_ms, Db};
use crate::error::Result;
use crate::object::Robj;
use crate::protocol::reply;
use crate::protocol::ReplyQueue;
use std::rc::Rc;
use tracing::{debug, warn};

/// What the connection should do after a command ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Flush pending replies, then close
    CloseAfterReply,
}

type CommandProc = fn(&mut Db, &[Robj], &mut ReplyQueue) -> Result<Outcome>;

pub struct Command {
    pub name: &'static str,
    proc: CommandProc,
    /// Exact argument count including the name, or minimum when negative
    pub arity: i32,
}

impl Command {
    fn arity_ok(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }
}

static COMMAND_TABLE: &[Command] = &[
    Command { name: "ping", proc: ping_command, arity: -1 },
    Command { name: "echo", proc: echo_command, arity: 2 },
    Command { name: "get", proc: get_command, arity: 2 },
    Command { name: "set", proc: set_command, arity: 3 },
    Command { name: "del", proc: del_command, arity: -2 },
    Command { name: "expire", proc: expire_command, arity: 3 },
    Command { name: "ttl", proc: ttl_command, arity: 2 },
    Command { name: "quit", proc: quit_command, arity: 1 },
];

/// Case-insensitive lookup by command name
pub fn lookup(name: &[u8]) -> Option<&'static Command> {
    COMMAND_TABLE
        .iter()
        .find(|cmd| cmd.name.as_bytes().eq_ignore_ascii_case(name))
}

/// Run one parsed request, queueing its reply on `replies`.
///
/// Errors a client can recover from become `-ERR` replies; only
/// connection-fatal ones are returned.
pub fn execute(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    let Some(name) = args.first().map(|a| a.to_bytes()) else {
        return Ok(Outcome::Continue);
    };

    let Some(cmd) = lookup(&name) else {
        let name = String::from_utf8_lossy(&name);
        debug!("Unknown command '{}'", name);
        replies.push(reply::error(&format!("unknown command '{}'", name)));
        return Ok(Outcome::Continue);
    };

    if !cmd.arity_ok(args.len()) {
        replies.push(reply::error(&format!(
            "wrong number of arguments for '{}' command",
            cmd.name
        )));
        return Ok(Outcome::Continue);
    }

    call(cmd.name, cmd.proc, db, args, replies)
}

fn call(
    name: &str,
    proc: CommandProc,
    db: &mut Db,
    args: &[Robj],
    replies: &mut ReplyQueue,
) -> Result<Outcome> {
    match proc(db, args, replies) {
        Err(e) if !e.is_connection_fatal() => {
            warn!("Command '{}' failed: {}", name, e);
            replies.push(reply::error(&e.to_string()));
            Ok(Outcome::Continue)
        }
        result => result,
    }
}

fn ping_command(_db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    match args {
        [_] => replies.push(reply::simple("PONG")),
        [_, msg] => replies.push(reply::bulk(&msg.to_bytes())),
        _ => replies.push(reply::error("wrong number of arguments for 'ping' command")),
    }
    Ok(Outcome::Continue)
}

fn echo_command(_db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    replies.push(reply::bulk(&args[1].to_bytes()));
    Ok(Outcome::Continue)
}

fn get_command(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    match db.lookup(&args[1]) {
        Some(value) => replies.push(reply::bulk(&value.to_bytes())),
        None => replies.push(reply::null_bulk()),
    }
    Ok(Outcome::Continue)
}

fn set_command(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    db.set(Rc::clone(&args[1]), Rc::clone(&args[2]))?;
    replies.push(reply::ok());
    Ok(Outcome::Continue)
}

fn del_command(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    let removed = args[1..].iter().filter(|key| db.delete(key)).count();
    replies.push(reply::integer(removed as i64));
    Ok(Outcome::Continue)
}

fn expire_command(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    let Some(seconds) = args[2].int_value() else {
        replies.push(reply::error("value is not an integer or out of range"));
        return Ok(Outcome::Continue);
    };
    let when = unix_ms().saturating_add(seconds.saturating_mul(1000));
    let updated = db.set_expire(&args[1], when)?;
    replies.push(reply::integer(updated as i64));
    Ok(Outcome::Continue)
}

fn ttl_command(db: &mut Db, args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    let now = unix_ms();
    let ttl = match db.lookup_at(&args[1], now) {
        None => -2,
        Some(_) => match db.ttl_ms(&args[1], now) {
            None => -1,
            Some(ms) => (ms + 999) / 1000,
        },
    };
    replies.push(reply::integer(ttl));
    Ok(Outcome::Continue)
}

fn quit_command(_db: &mut Db, _args: &[Robj], replies: &mut ReplyQueue) -> Result<Outcome> {
    replies.push(reply::ok());
    Ok(Outcome::CloseAfterReply)
}
