//! C4: non-blocking UNIX socket server (spec.md §4.3).

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::raw;
use crate::reactor::{JobMode, Reactor};
use crate::task::{IoTask, Op, RecvOutcome, SendOutcome};

/// A server- or client-side connection (spec.md §3: "Connection").
/// `P` is the upper layer's private per-connection state (spec.md's
/// `priv` field), carried as a typed slot instead of an opaque pointer.
pub struct Connection<P> {
    fd: RawFd,
    stream: std::os::unix::net::UnixStream,
    read_task: IoTask,
    write_task: IoTask,
    eof: bool,
    peer: Option<String>,
    pub priv_data: Option<P>,
}

impl<P> Connection<P> {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// The bytes delivered by the most recently completed `recv`, i.e. the
    /// unread tail of the read task's buffer.
    pub fn recv_data(&self) -> &[u8] {
        self.read_task.buffer.unread()
    }

    pub fn mark_consumed(&mut self, n: usize) {
        let new_offset = self.read_task.buffer.offset() + n;
        self.read_task.buffer.set_offset(new_offset);
    }
}

struct ServerInner<P> {
    listener: UnixListener,
    connections: HashMap<RawFd, Connection<P>>,
}

/// Owns the listening socket and the keyed table of accepted connections
/// (spec.md §3: "inserted into server's keyed map under `fd`").
pub struct UnixSocketServer<P> {
    inner: Rc<RefCell<ServerInner<P>>>,
}

impl<P> Clone for UnixSocketServer<P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<P: 'static> UnixSocketServer<P> {
    /// Binds, listens (backlog 50), and registers a persistent READ job
    /// that is the acceptor. `acceptor` returns `false` to reject and
    /// immediately close a freshly accepted connection. It receives the
    /// server handle, the new connection's `fd`, and the reactor — never a
    /// live borrow of the connection itself, the same convention `send`/
    /// `recv` completions already use — so it is free to call back into
    /// `server.send`/`server.recv` to arm follow-up jobs (e.g. an
    /// unsolicited `DRV_INFO` send, spec.md §4.6.3) without re-entering a
    /// borrowed `RefCell`.
    pub fn bind(
        path: &Path,
        reactor: &mut Reactor,
        mut acceptor: impl FnMut(&UnixSocketServer<P>, RawFd, &mut Reactor) -> bool + 'static,
    ) -> Result<Self, ConnectionError> {
        let listener = raw::bind_listener(path)?;
        let fd = listener.as_raw_fd();
        let inner = Rc::new(RefCell::new(ServerInner { listener, connections: HashMap::new() }));
        let server = Self { inner };
        let accepting = server.clone();
        reactor.post_job(fd, Op::Read, JobMode::Persistent, move |reactor, _fd, _op| {
            accepting.accept_ready(reactor, &mut acceptor);
        })?;
        Ok(server)
    }

    fn accept_ready(
        &self,
        reactor: &mut Reactor,
        acceptor: &mut impl FnMut(&UnixSocketServer<P>, RawFd, &mut Reactor) -> bool,
    ) {
        loop {
            let accepted = self.inner.borrow().listener.accept();
            match accepted {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("failed to set accepted socket non-blocking: {e}");
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    let conn = Connection {
                        fd,
                        stream,
                        read_task: IoTask::default(),
                        write_task: IoTask::default(),
                        eof: false,
                        peer: None,
                        priv_data: None,
                    };
                    self.inner.borrow_mut().connections.insert(fd, conn);
                    if acceptor(self, fd, reactor) {
                        debug!(fd, "accepted connection");
                    } else {
                        debug!(fd, "acceptor rejected connection");
                        let _ = self.close_connection(reactor, fd);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    pub fn with_connection<R>(&self, fd: RawFd, f: impl FnOnce(&mut Connection<P>) -> R) -> Option<R> {
        self.inner.borrow_mut().connections.get_mut(&fd).map(f)
    }

    /// Deregisters both ops, deinitializes the task buffers, and drops the
    /// stream (shutting down and closing the fd). Jobs are deregistered
    /// *before* the fd is closed so the reactor never invokes a callback on
    /// a stale fd (spec.md §5).
    pub fn close_connection(&self, reactor: &mut Reactor, fd: RawFd) -> Result<(), ConnectionError> {
        reactor.remove_job(fd, Op::Read)?;
        reactor.remove_job(fd, Op::Write)?;
        if let Some(mut conn) = self.inner.borrow_mut().connections.remove(&fd) {
            conn.read_task.buffer.clear();
            conn.write_task.buffer.clear();
            let _ = conn.stream.shutdown(std::net::Shutdown::Both);
        }
        debug!(fd, "closed connection");
        Ok(())
    }

    /// Async send: copies `data` into the write task, registers a
    /// persistent WRITE job, and invokes `on_complete` once all bytes are
    /// sent or a hard error occurs (spec.md §4.3).
    pub fn send(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        data: &[u8],
        mut on_complete: impl FnMut(&UnixSocketServer<P>, &mut Reactor, RawFd, SendOutcome) + 'static,
    ) -> Result<(), ConnectionError> {
        {
            let mut inner = self.inner.borrow_mut();
            let conn = inner.connections.get_mut(&fd).ok_or(ConnectionError::NotFound)?;
            if conn.write_task.active {
                return Err(ConnectionError::SendInFlight);
            }
            conn.write_task.reset_for_send(data);
        }
        let server = self.clone();
        reactor.post_job(fd, Op::Write, JobMode::Persistent, move |reactor, fd, _op| {
            server.drive_write(reactor, fd, &mut on_complete);
        })?;
        Ok(())
    }

    fn drive_write(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        on_complete: &mut impl FnMut(&UnixSocketServer<P>, &mut Reactor, RawFd, SendOutcome),
    ) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            let Some(conn) = inner.connections.get_mut(&fd) else { return };
            drive_write_task(fd, &mut conn.write_task)
        };
        if let Some(outcome) = outcome {
            if let Some(conn) = self.inner.borrow_mut().connections.get_mut(&fd) {
                conn.write_task.active = false;
            }
            let _ = reactor.remove_job(fd, Op::Write);
            on_complete(self, reactor, fd, outcome);
        }
    }

    /// Async recv: appends `size` bytes of room to the read task and
    /// registers a persistent READ job. `FIONREAD == 0` on a readable fd is
    /// treated as EOF (spec.md §4.3).
    pub fn recv(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        size: usize,
        mut on_complete: impl FnMut(&UnixSocketServer<P>, &mut Reactor, RawFd, RecvOutcome) + 'static,
    ) -> Result<(), ConnectionError> {
        {
            let mut inner = self.inner.borrow_mut();
            let conn = inner.connections.get_mut(&fd).ok_or(ConnectionError::NotFound)?;
            if conn.read_task.active {
                return Err(ConnectionError::RecvInFlight);
            }
            conn.read_task.reset_for_recv(size);
        }
        let server = self.clone();
        reactor.post_job(fd, Op::Read, JobMode::Persistent, move |reactor, fd, _op| {
            server.drive_read(reactor, fd, &mut on_complete);
        })?;
        Ok(())
    }

    fn drive_read(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        on_complete: &mut impl FnMut(&UnixSocketServer<P>, &mut Reactor, RawFd, RecvOutcome),
    ) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            let Some(conn) = inner.connections.get_mut(&fd) else { return };
            let r = drive_read_task(fd, &mut conn.read_task);
            if matches!(r, Some(RecvOutcome::Eof)) {
                conn.eof = true;
            }
            r
        };
        if let Some(outcome) = outcome {
            if let Some(conn) = self.inner.borrow_mut().connections.get_mut(&fd) {
                conn.read_task.active = false;
            }
            let _ = reactor.remove_job(fd, Op::Read);
            on_complete(self, reactor, fd, outcome);
        }
    }
}

/// Shared by server and client: drains as much of the write task's
/// remaining bytes as the socket accepts, retrying `EINTR` in place and
/// stopping on `EAGAIN`.
pub(crate) fn drive_write_task(fd: RawFd, task: &mut IoTask) -> Option<SendOutcome> {
    loop {
        let remaining = &task.buffer.as_slice()[task.progress..];
        if remaining.is_empty() {
            return Some(SendOutcome::Complete);
        }
        match raw::send_nonblocking(fd, remaining) {
            Ok(n) => task.progress += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => return Some(SendOutcome::Error(e)),
        }
    }
}

/// Shared by server and client: reads the smaller of pending/remaining
/// bytes, `FIONREAD`-bounded, treating zero pending as EOF.
pub(crate) fn drive_read_task(fd: RawFd, task: &mut IoTask) -> Option<RecvOutcome> {
    loop {
        let remaining = task.buffer.user_size() - task.buffer.offset() - task.progress;
        if remaining == 0 {
            return Some(RecvOutcome::Complete);
        }
        let pending = match raw::pending_bytes(fd) {
            Ok(p) => p,
            Err(e) => return Some(RecvOutcome::Error(e)),
        };
        if pending == 0 {
            return Some(RecvOutcome::Eof);
        }
        let want = remaining.min(pending);
        let start = task.buffer.offset() + task.progress;
        match raw::recv_nonblocking(fd, &mut task.buffer.as_mut_slice()[start..start + want]) {
            Ok(0) => return Some(RecvOutcome::Eof),
            Ok(n) => task.progress += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => return Some(RecvOutcome::Error(e)),
        }
    }
}
