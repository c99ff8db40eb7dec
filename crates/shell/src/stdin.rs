//! Non-blocking line-buffered stdin, registered on the same reactor as the
//! driver connections (spec.md §6: "interactive line parser... out of
//! scope beyond the interface the core consumes from it" — this module is
//! that interface's concrete realization, not part of the core's
//! contract). Stdin is a pipe or tty fd, not a socket, so it cannot use
//! `odd_io::raw`'s `recv`/`send` (those wrap `libc::recv`/`send`, which
//! reject non-socket fds); plain `read`/`fcntl` are used instead.

use std::io::ErrorKind;
use std::os::unix::io::RawFd;

use odd_io::{JobMode, Op, Reactor};
use tracing::warn;

const STDIN_FD: RawFd = 0;

#[derive(Debug, Clone)]
pub enum StdinEvent {
    Line(String),
    Eof,
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl(F_GETFL)/(F_SETFL) on a valid, process-owned fd.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn read_available(fd: RawFd, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut chunk = [0u8; 4096];
    loop {
        // SAFETY: `chunk` is a valid, exclusively borrowed byte buffer.
        let ret = unsafe {
            libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len())
        };
        match ret {
            0 => return Ok(true), // EOF
            n if n > 0 => buf.extend_from_slice(&chunk[..n as usize]),
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::WouldBlock {
                    return Ok(false);
                }
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// Sets stdin non-blocking and registers a persistent READ job that
/// accumulates bytes, splits on `\n`, and fires `on_event` once per
/// completed line (or once with `Eof` when the peer closes stdin).
pub fn arm(reactor: &mut Reactor, mut on_event: impl FnMut(&mut Reactor, StdinEvent) + 'static) {
    if let Err(e) = set_nonblocking(STDIN_FD) {
        warn!("failed to set stdin non-blocking: {e}");
        return;
    }
    let mut pending = Vec::new();
    if let Err(e) = reactor.post_job(STDIN_FD, Op::Read, JobMode::Persistent, move |reactor, fd, _op| {
        let eof = match read_available(fd, &mut pending) {
            Ok(eof) => eof,
            Err(e) => {
                warn!("read error on stdin: {e}");
                return;
            }
        };
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            on_event(reactor, StdinEvent::Line(line));
        }
        if eof {
            if !pending.is_empty() {
                let line = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                on_event(reactor, StdinEvent::Line(line));
            }
            on_event(reactor, StdinEvent::Eof);
        }
    }) {
        warn!("failed to arm stdin recv: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::os::unix::io::AsRawFd;
    use std::rc::Rc;

    fn pump(reactor: &mut Reactor) {
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn splits_on_newlines_and_reports_eof() {
        let (read_end, write_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd = read_end.as_raw_fd();
        let mut reactor = Reactor::new().unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let events2 = events.clone();

        set_nonblocking(fd).unwrap();
        reactor
            .post_job(fd, Op::Read, JobMode::Persistent, move |reactor, fd, _op| {
                let mut pending = Vec::new();
                let eof = read_available(fd, &mut pending).unwrap();
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
                    events2.borrow_mut().push(StdinEvent::Line(line));
                }
                if eof {
                    events2.borrow_mut().push(StdinEvent::Eof);
                }
                let _ = reactor;
            })
            .unwrap();

        std::io::Write::write_all(&mut (&write_end), b"list\nhelp\n").unwrap();
        pump(&mut reactor);
        drop(write_end);
        pump(&mut reactor);

        let lines: Vec<String> = events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                StdinEvent::Line(s) => Some(s.clone()),
                StdinEvent::Eof => None,
            })
            .collect();
        assert_eq!(lines, vec!["list".to_string(), "help".to_string()]);
        assert!(events.borrow().iter().any(|e| matches!(e, StdinEvent::Eof)));
    }
}
