//! Single-threaded reactor: readiness-based file events plus a timer list.
//!
//! Interest is tracked per `(fd, direction)` so read and write registrations
//! on one descriptor are independent; the multiplexer registration for the
//! descriptor is added, modified or removed to match the union of the two.
//!
//! Callbacks are not stored as closures. Each registration carries a task
//! value (a small enum chosen by the embedder) which is handed back to an
//! [`EventHandler`] together with the loop itself, so a callback can change
//! registrations or timers while it runs. Those changes apply from the next
//! iteration on.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Wait horizon when no timer is scheduled
const DEFAULT_HORIZON_MS: u64 = 1000;

/// Wait used when a timer is already due, so the poll still happens
const MIN_WAIT_MS: u64 = 10;

const EVENTS_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mask {
    Readable,
    Writable,
}

impl Mask {
    fn interest(self) -> Interest {
        match self {
            Mask::Readable => Interest::READABLE,
            Mask::Writable => Interest::WRITABLE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once and is removed
    Once,
    /// Rescheduled `interval` after each firing
    Repeat,
}

pub type TimerId = u64;

struct FileEvent<F> {
    task: F,
}

struct TimeEvent<T> {
    id: TimerId,
    kind: TimerKind,
    when: u64,
    interval: u64,
    task: T,
}

/// Receives the callbacks scheduled on an [`EventLoop`].
pub trait EventHandler<F, T> {
    fn on_file_event(&mut self, el: &mut EventLoop<F, T>, fd: RawFd, mask: Mask, task: F);

    fn on_time_event(&mut self, el: &mut EventLoop<F, T>, id: TimerId, task: T);
}

/// Cloneable flag that makes [`EventLoop::run`] return.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct EventLoop<F, T> {
    poll: Poll,
    events: Events,
    file_events: HashMap<(RawFd, Mask), FileEvent<F>>,
    time_events: Vec<TimeEvent<T>>,
    next_timer_id: TimerId,
    epoch: Instant,
    stop: StopHandle,
}

impl<F: Clone, T: Clone> EventLoop<F, T> {
    /// Create the loop and its multiplexer
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            file_events: HashMap::new(),
            time_events: Vec::new(),
            next_timer_id: 1,
            epoch: Instant::now(),
            stop: StopHandle(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Milliseconds on the loop's monotonic clock
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        let read = self
            .file_events
            .contains_key(&(fd, Mask::Readable))
            .then_some(Interest::READABLE);
        let write = self
            .file_events
            .contains_key(&(fd, Mask::Writable))
            .then_some(Interest::WRITABLE);
        match (read, write) {
            (Some(r), Some(w)) => Some(r | w),
            (r, w) => r.or(w),
        }
    }

    pub fn is_registered(&self, fd: RawFd, mask: Mask) -> bool {
        self.file_events.contains_key(&(fd, mask))
    }

    /// Add interest in one direction for `fd`.
    ///
    /// Returns false, after logging, when the interest already exists or the
    /// multiplexer rejects the registration.
    pub fn register(&mut self, fd: RawFd, mask: Mask, task: F) -> bool {
        if self.is_registered(fd, mask) {
            debug!("fd {} already registered for {:?}", fd, mask);
            return false;
        }

        let registry = self.poll.registry();
        let token = Token(fd as usize);
        let result = match self.interest_of(fd) {
            None => registry.register(&mut SourceFd(&fd), token, mask.interest()),
            Some(current) => registry.reregister(
                &mut SourceFd(&fd),
                token,
                current | mask.interest(),
            ),
        };
        if let Err(e) = result {
            warn!("Failed to register fd {} for {:?}: {}", fd, mask, e);
            return false;
        }

        self.file_events.insert((fd, mask), FileEvent { task });
        trace!("Registered fd {} for {:?}", fd, mask);
        true
    }

    /// Re-register the current interest of `fd` so readiness that is still
    /// pending is reported again on the next wait. Readiness is edge
    /// triggered, so a callback that stops short of would-block uses this
    /// to be called back.
    pub fn rearm(&mut self, fd: RawFd) -> bool {
        let Some(interest) = self.interest_of(fd) else {
            return false;
        };
        if let Err(e) = self
            .poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
        {
            warn!("Failed to rearm fd {}: {}", fd, e);
            return false;
        }
        trace!("Rearmed fd {}", fd);
        true
    }

    /// Drop interest in one direction, keeping the other if present.
    pub fn unregister(&mut self, fd: RawFd, mask: Mask) {
        if !self.is_registered(fd, mask) {
            return;
        }

        let registry = self.poll.registry();
        let remaining = match mask {
            Mask::Readable => self.is_registered(fd, Mask::Writable).then_some(Interest::WRITABLE),
            Mask::Writable => self.is_registered(fd, Mask::Readable).then_some(Interest::READABLE),
        };
        let result = match remaining {
            Some(interest) => registry.reregister(&mut SourceFd(&fd), Token(fd as usize), interest),
            None => registry.deregister(&mut SourceFd(&fd)),
        };
        if let Err(e) = result {
            warn!("Failed to unregister fd {} for {:?}: {}", fd, mask, e);
            return;
        }

        self.file_events.remove(&(fd, mask));
        trace!("Unregistered fd {} for {:?}", fd, mask);
    }

    /// Schedule `task` to fire `interval_ms` from now
    pub fn schedule_timer(&mut self, kind: TimerKind, interval_ms: u64, task: T) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.time_events.push(TimeEvent {
            id,
            kind,
            when: self.now_ms() + interval_ms,
            interval: interval_ms,
            task,
        });
        id
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.time_events.retain(|te| te.id != id);
    }

    /// Next fire time of timer `id` on the loop clock
    pub fn timer_deadline(&self, id: TimerId) -> Option<u64> {
        self.time_events.iter().find(|te| te.id == id).map(|te| te.when)
    }

    fn nearest_timer(&self) -> u64 {
        let horizon = self.now_ms() + DEFAULT_HORIZON_MS;
        self.time_events
            .iter()
            .map(|te| te.when)
            .fold(horizon, u64::min)
    }

    /// Block for readiness or the nearest timer, then collect what fired.
    fn wait(&mut self) -> (Vec<(TimerId, T)>, Vec<(RawFd, Mask, F)>) {
        let now = self.now_ms();
        let timeout = match self.nearest_timer().saturating_sub(now) {
            0 => MIN_WAIT_MS,
            ms => ms,
        };

        let polled = self
            .poll
            .poll(&mut self.events, Some(Duration::from_millis(timeout)));
        self.collect(polled)
    }

    /// Gather fired file events and due timers. A failed wait counts as an
    /// iteration in which no descriptor became ready.
    fn collect(&mut self, polled: io::Result<()>) -> (Vec<(TimerId, T)>, Vec<(RawFd, Mask, F)>) {
        if let Err(e) = polled {
            warn!("Multiplexer wait failed: {}", e);
            self.events.clear();
        }

        let mut fired = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                if let Some(fe) = self.file_events.get(&(fd, Mask::Readable)) {
                    fired.push((fd, Mask::Readable, fe.task.clone()));
                }
            }
            if event.is_writable() || event.is_write_closed() {
                if let Some(fe) = self.file_events.get(&(fd, Mask::Writable)) {
                    fired.push((fd, Mask::Writable, fe.task.clone()));
                }
            }
        }
        if !fired.is_empty() {
            trace!("Collected {} file events", fired.len());
        }

        let now = self.now_ms();
        let due = self
            .time_events
            .iter()
            .filter(|te| te.when <= now)
            .map(|te| (te.id, te.task.clone()))
            .collect();

        (due, fired)
    }

    /// Run one iteration: wait, fire due timers, then file events.
    /// Returns the number of callbacks invoked.
    pub fn process_events<H: EventHandler<F, T>>(&mut self, handler: &mut H) -> usize {
        let (due, fired) = self.wait();
        let count = due.len() + fired.len();

        for (id, task) in due {
            handler.on_time_event(self, id, task);
            let now = self.now_ms();
            let Some(pos) = self.time_events.iter().position(|te| te.id == id) else {
                continue;
            };
            match self.time_events[pos].kind {
                TimerKind::Once => {
                    self.time_events.remove(pos);
                }
                TimerKind::Repeat => {
                    let te = &mut self.time_events[pos];
                    te.when = now + te.interval;
                }
            }
        }

        for (fd, mask, task) in fired {
            handler.on_file_event(self, fd, mask, task);
        }

        count
    }

    /// Loop until stopped
    pub fn run<H: EventHandler<F, T>>(&mut self, handler: &mut H) {
        debug!("Event loop started");
        while !self.stop.is_stopped() {
            self.process_events(handler);
        }
        debug!("Event loop stopped");
    }
}
