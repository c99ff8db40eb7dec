//! C3: the I/O service — a single-threaded readiness multiplexor (spec.md §4.2).
//!
//! Built on `mio` as the pack's closest idiomatic match to a manual
//! `(fd, op)` job-registration reactor; the teacher itself doesn't expose
//! this primitive (it's tokio task-per-connection), so this module is
//! grounded on the FUSE/session-loop reactors under `other_examples/` and
//! on `mio` itself rather than on `alfredjeanlab-oddjobs`.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::trace;

use crate::error::IoServiceError;
use crate::task::Op;

/// I/O registration mode (spec.md §3: "Job Registration").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// Removed by the service before its callback is invoked.
    Oneshot,
    /// Remains registered until `remove_job` is called.
    Persistent,
}

type Callback = Box<dyn FnMut(&mut Reactor, RawFd, Op)>;

struct Job {
    mode: JobMode,
    callback: Callback,
}

#[derive(Default)]
struct FdJobs {
    read: Option<Job>,
    write: Option<Job>,
}

impl FdJobs {
    fn slot_mut(&mut self, op: Op) -> &mut Option<Job> {
        match op {
            Op::Read => &mut self.read,
            Op::Write => &mut self.write,
        }
    }

    fn interest(&self) -> Option<Interest> {
        match (self.read.is_some(), self.write.is_some()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

/// The readiness loop. Owns no file descriptors itself (spec.md §5:
/// "the I/O service owns none, it only references FDs by value").
pub struct Reactor {
    poll: Poll,
    events: Events,
    jobs: HashMap<RawFd, FdJobs>,
    registered: HashSet<RawFd>,
    stop_requested: bool,
    drain_on_stop: bool,
    /// `(fd, op)` of the job whose callback is currently running, if any.
    dispatching: Option<(RawFd, Op)>,
    /// Set by `remove_job` when it targets `dispatching`, so a persistent
    /// job that removes itself isn't transparently reinstated afterward.
    suppress_reinsert: bool,
}

impl Reactor {
    pub fn new() -> Result<Self, IoServiceError> {
        Ok(Self {
            poll: Poll::new().map_err(IoServiceError::Poll)?,
            events: Events::with_capacity(256),
            jobs: HashMap::new(),
            registered: HashSet::new(),
            stop_requested: false,
            drain_on_stop: false,
            dispatching: None,
            suppress_reinsert: false,
        })
    }

    /// Registers (or replaces) the job for `(fd, op)`. Re-posting replaces
    /// any job already registered for that pair (spec.md §3).
    pub fn post_job(
        &mut self,
        fd: RawFd,
        op: Op,
        mode: JobMode,
        callback: impl FnMut(&mut Reactor, RawFd, Op) + 'static,
    ) -> Result<(), IoServiceError> {
        let entry = self.jobs.entry(fd).or_default();
        *entry.slot_mut(op) = Some(Job { mode, callback: Box::new(callback) });
        trace!(fd, ?op, ?mode, "post_job");
        self.resync_registration(fd)
    }

    /// Removes the job for `(fd, op)`, if any. Legal from inside a callback
    /// running on any fd, including `fd` itself.
    pub fn remove_job(&mut self, fd: RawFd, op: Op) -> Result<(), IoServiceError> {
        if let Some(entry) = self.jobs.get_mut(&fd) {
            *entry.slot_mut(op) = None;
        }
        if self.dispatching == Some((fd, op)) {
            self.suppress_reinsert = true;
        }
        trace!(fd, ?op, "remove_job");
        self.resync_registration(fd)
    }

    pub fn has_job(&self, fd: RawFd, op: Op) -> bool {
        self.jobs.get(&fd).map(|j| j.slot_mut_ref(op).is_some()).unwrap_or(false)
    }

    fn resync_registration(&mut self, fd: RawFd) -> Result<(), IoServiceError> {
        let interest = self.jobs.get(&fd).and_then(FdJobs::interest);
        match interest {
            None => {
                self.jobs.remove(&fd);
                if self.registered.remove(&fd) {
                    self.poll
                        .registry()
                        .deregister(&mut SourceFd(&fd))
                        .map_err(IoServiceError::Register)?;
                }
            }
            Some(interest) => {
                if self.registered.insert(fd) {
                    self.poll
                        .registry()
                        .register(&mut SourceFd(&fd), Token(fd as usize), interest)
                        .map_err(IoServiceError::Register)?;
                } else {
                    self.poll
                        .registry()
                        .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
                        .map_err(IoServiceError::Register)?;
                }
            }
        }
        Ok(())
    }

    /// Runs the loop until `stop` has been observed and, if `drain` was
    /// requested, all currently pending readiness notifications have been
    /// delivered (spec.md §4.2).
    pub fn run(&mut self) -> Result<(), IoServiceError> {
        loop {
            let timeout = if self.stop_requested { Some(Duration::ZERO) } else { None };
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoServiceError::Poll(e)),
            }
            if self.stop_requested && (!self.drain_on_stop || self.events.is_empty()) {
                return Ok(());
            }
            let ready: Vec<(RawFd, bool, bool)> = self
                .events
                .iter()
                .map(|e| (e.token().0 as RawFd, e.is_readable(), e.is_writable()))
                .collect();
            for (fd, readable, writable) in ready {
                if readable {
                    self.dispatch(fd, Op::Read);
                }
                if writable {
                    self.dispatch(fd, Op::Write);
                }
            }
        }
    }

    /// Global terminator (spec.md §5). `drain = false` stops immediately
    /// (used for directory self-delete, spec.md §4.6.2).
    pub fn stop(&mut self, drain: bool) {
        self.stop_requested = true;
        self.drain_on_stop = drain;
    }

    fn dispatch(&mut self, fd: RawFd, op: Op) {
        let taken = match self.jobs.get_mut(&fd) {
            Some(fdj) => fdj.slot_mut(op).take(),
            None => None,
        };
        let Some(Job { mode, mut callback }) = taken else { return };
        // Oneshot jobs are removed before the callback runs; persistent
        // jobs are also removed here (to release the borrow on `self.jobs`
        // for the duration of the callback) and reinserted afterward
        // unless the callback itself re-registered the slot, or explicitly
        // removed it via `remove_job(fd, op)` on itself.
        let _ = self.resync_registration(fd);
        let prev_dispatching = self.dispatching.replace((fd, op));
        let prev_suppress = std::mem::replace(&mut self.suppress_reinsert, false);
        callback(self, fd, op);
        let suppressed = self.suppress_reinsert;
        self.dispatching = prev_dispatching;
        self.suppress_reinsert = prev_suppress;
        if mode == JobMode::Persistent && !suppressed {
            if let Some(fdj) = self.jobs.get_mut(&fd) {
                let slot = fdj.slot_mut(op);
                if slot.is_none() {
                    *slot = Some(Job { mode, callback });
                    let _ = self.resync_registration(fd);
                }
            }
        }
    }
}

impl FdJobs {
    fn slot_mut_ref(&self, op: Op) -> &Option<Job> {
        match op {
            Op::Read => &self.read,
            Op::Write => &self.write,
        }
    }
}
