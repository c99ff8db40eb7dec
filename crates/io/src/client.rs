//! C5: UNIX socket client with reconnect (spec.md §4.4).

use std::cell::RefCell;
use std::io::ErrorKind;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::error::ConnectionError;
use crate::raw;
use crate::reactor::{JobMode, Reactor};
use crate::server::{drive_read_task, drive_write_task};
use crate::task::{IoTask, Op, RecvOutcome, SendOutcome};

struct ClientInner<P> {
    stream: UnixStream,
    fd: RawFd,
    path: PathBuf,
    peer: Option<String>,
    read_task: IoTask,
    write_task: IoTask,
    eof: bool,
    priv_data: Option<P>,
}

/// Same task shape and `send`/`recv` contract as the server side, plus
/// `connect`/`reconnect`/`deinit` (spec.md §4.4).
pub struct UnixSocketClient<P> {
    inner: Rc<RefCell<ClientInner<P>>>,
}

impl<P> Clone for UnixSocketClient<P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<P: 'static> UnixSocketClient<P> {
    /// Starts a non-blocking connect to `path`, attaching `peer` as the
    /// connection's peer name, and fires `connector` on completion
    /// (writability, the standard non-blocking-connect readiness signal).
    pub fn connect(
        path: &Path,
        peer: impl Into<String>,
        reactor: &mut Reactor,
        mut connector: impl FnMut(&UnixSocketClient<P>, &mut Reactor) + 'static,
    ) -> Result<Self, ConnectionError> {
        let stream = raw::connect_nonblocking(path)?;
        let fd = stream.as_raw_fd();
        let inner = Rc::new(RefCell::new(ClientInner {
            stream,
            fd,
            path: path.to_path_buf(),
            peer: Some(peer.into()),
            read_task: IoTask::default(),
            write_task: IoTask::default(),
            eof: false,
            priv_data: None,
        }));
        let client = Self { inner };
        let fired = client.clone();
        reactor.post_job(fd, Op::Write, JobMode::Oneshot, move |reactor, _fd, _op| {
            connector(&fired, reactor);
        })?;
        Ok(client)
    }

    pub fn fd(&self) -> RawFd {
        self.inner.borrow().fd
    }

    pub fn peer(&self) -> Option<String> {
        self.inner.borrow().peer.clone()
    }

    pub fn eof(&self) -> bool {
        self.inner.borrow().eof
    }

    pub fn with_priv<R>(&self, f: impl FnOnce(&mut Option<P>) -> R) -> R {
        f(&mut self.inner.borrow_mut().priv_data)
    }

    pub fn recv_data(&self) -> Vec<u8> {
        self.inner.borrow().read_task.buffer.unread().to_vec()
    }

    pub fn mark_consumed(&self, n: usize) {
        let mut inner = self.inner.borrow_mut();
        let new_offset = inner.read_task.buffer.offset() + n;
        inner.read_task.buffer.set_offset(new_offset);
    }

    /// Closes the current fd, opens a fresh socket, and reconnects to the
    /// stored path, resetting both task buffers to empty (upper-level
    /// state such as `priv_data` is preserved).
    pub fn reconnect(&self, reactor: &mut Reactor) -> Result<(), ConnectionError> {
        let old_fd = {
            let inner = self.inner.borrow();
            inner.fd
        };
        reactor.remove_job(old_fd, Op::Read)?;
        reactor.remove_job(old_fd, Op::Write)?;
        let path = self.inner.borrow().path.clone();
        let new_stream = raw::connect_nonblocking(&path)?;
        let new_fd = new_stream.as_raw_fd();
        let mut inner = self.inner.borrow_mut();
        let _ = inner.stream.shutdown(std::net::Shutdown::Both);
        inner.stream = new_stream;
        inner.fd = new_fd;
        inner.read_task.buffer.clear();
        inner.write_task.buffer.clear();
        inner.read_task.active = false;
        inner.write_task.active = false;
        inner.eof = false;
        debug!(old_fd, new_fd, "reconnected");
        Ok(())
    }

    /// Best-effort close; does not deregister jobs (the caller is expected
    /// to have already torn down any jobs registered on this client's fd,
    /// mirroring `close_connection`'s ordering on the server side).
    pub fn deinit(&self, reactor: &mut Reactor) {
        let fd = self.inner.borrow().fd;
        let _ = reactor.remove_job(fd, Op::Read);
        let _ = reactor.remove_job(fd, Op::Write);
        let _ = self.inner.borrow().stream.shutdown(std::net::Shutdown::Both);
    }

    pub fn send(
        &self,
        reactor: &mut Reactor,
        mut on_complete: impl FnMut(&UnixSocketClient<P>, &mut Reactor, SendOutcome) + 'static,
        data: &[u8],
    ) -> Result<(), ConnectionError> {
        let fd = {
            let mut inner = self.inner.borrow_mut();
            if inner.write_task.active {
                return Err(ConnectionError::SendInFlight);
            }
            inner.write_task.reset_for_send(data);
            inner.fd
        };
        let client = self.clone();
        reactor.post_job(fd, Op::Write, JobMode::Persistent, move |reactor, fd, _op| {
            client.drive_write(reactor, fd, &mut on_complete);
        })?;
        Ok(())
    }

    fn drive_write(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        on_complete: &mut impl FnMut(&UnixSocketClient<P>, &mut Reactor, SendOutcome),
    ) {
        if self.inner.borrow().fd != fd {
            return; // stale job from before a reconnect
        }
        let outcome = drive_write_task(fd, &mut self.inner.borrow_mut().write_task);
        if let Some(outcome) = outcome {
            self.inner.borrow_mut().write_task.active = false;
            let _ = reactor.remove_job(fd, Op::Write);
            on_complete(self, reactor, outcome);
        }
    }

    pub fn recv(
        &self,
        reactor: &mut Reactor,
        size: usize,
        mut on_complete: impl FnMut(&UnixSocketClient<P>, &mut Reactor, RecvOutcome) + 'static,
    ) -> Result<(), ConnectionError> {
        let fd = {
            let mut inner = self.inner.borrow_mut();
            if inner.read_task.active {
                return Err(ConnectionError::RecvInFlight);
            }
            inner.read_task.reset_for_recv(size);
            inner.fd
        };
        let client = self.clone();
        reactor.post_job(fd, Op::Read, JobMode::Persistent, move |reactor, fd, _op| {
            client.drive_read(reactor, fd, &mut on_complete);
        })?;
        Ok(())
    }

    fn drive_read(
        &self,
        reactor: &mut Reactor,
        fd: RawFd,
        on_complete: &mut impl FnMut(&UnixSocketClient<P>, &mut Reactor, RecvOutcome),
    ) {
        if self.inner.borrow().fd != fd {
            return; // stale job from before a reconnect
        }
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            let r = drive_read_task(fd, &mut inner.read_task);
            if matches!(r, Some(RecvOutcome::Eof)) {
                inner.eof = true;
            }
            r
        };
        if let Some(outcome) = outcome {
            self.inner.borrow_mut().read_task.active = false;
            let _ = reactor.remove_job(fd, Op::Read);
            on_complete(self, reactor, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::cell::Cell;
    use std::os::unix::net::UnixListener;

    fn pump(reactor: &mut Reactor) {
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn connect_fires_connector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.sock");
        let _listener = UnixListener::bind(&path).unwrap();
        let mut reactor = Reactor::new().unwrap();
        let connected = Rc::new(Cell::new(false));
        let connected2 = connected.clone();
        let _client: UnixSocketClient<()> =
            UnixSocketClient::connect(&path, "drv.0", &mut reactor, move |_c, _r| {
                connected2.set(true);
            })
            .unwrap();
        pump(&mut reactor);
        assert!(connected.get());
    }

    #[test]
    fn reconnect_resets_buffers_but_keeps_priv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.sock");
        let _listener = UnixListener::bind(&path).unwrap();
        let mut reactor = Reactor::new().unwrap();
        let client: UnixSocketClient<u32> =
            UnixSocketClient::connect(&path, "drv.0", &mut reactor, |_c, _r| {}).unwrap();
        pump(&mut reactor);
        client.with_priv(|p| *p = Some(42));
        client.reconnect(&mut reactor).unwrap();
        assert_eq!(client.with_priv(|p| *p), Some(42));
        assert_eq!(client.inner.borrow().read_task.buffer.user_size(), 0);
    }
}
