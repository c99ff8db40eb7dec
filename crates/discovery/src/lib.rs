//! odd-discovery: C6, the directory watcher (spec.md §4.5).
//!
//! Realized with the `notify` crate — already a dependency of the
//! teacher's CLI crate for log-tail watching — bridged into the
//! single-threaded reactor via a self-pipe: `notify`'s own watcher thread
//! pushes parsed events onto a shared queue and writes one wake byte per
//! batch; the reactor-side read end is a plain persistent READ job.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use odd_io::reactor::{JobMode, Reactor};
use odd_io::task::Op;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create base directory")]
    CreateDir(#[source] std::io::Error),

    #[error("failed to scan base directory")]
    Scan(#[source] std::io::Error),

    #[error("failed to open wake pipe")]
    Pipe(#[source] std::io::Error),

    #[error("failed to install filesystem watch")]
    Notify(#[source] notify::Error),

    #[error(transparent)]
    IoService(#[from] odd_io::error::IoServiceError),
}

/// The three logical events the registry consumes (spec.md §4.5).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created(OsString),
    Deleted(OsString),
    SelfDeleted,
}

enum RawEvent {
    Created(PathBuf),
    Deleted(PathBuf),
    SelfDeleted,
}

/// Owns the `notify` watcher, the wake pipe, and the base directory path.
/// Dropping it stops the watch and closes the pipe.
pub struct Watcher {
    _inner: RecommendedWatcher,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // SAFETY: both fds are owned exclusively by this struct and not
        // used again after drop.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn make_pipe() -> std::io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid 2-element out-param for pipe2.
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 256];
    loop {
        // SAFETY: `buf` is a valid, exclusively borrowed byte buffer.
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if ret <= 0 {
            break;
        }
    }
}

fn wake(fd: RawFd) {
    // SAFETY: a single-byte write to an fd we hold open for the process lifetime.
    unsafe {
        libc::write(fd, [1u8].as_ptr() as *const libc::c_void, 1);
    }
}

/// Installs the watch, performs the one-shot bootstrap scan (alphabetical
/// order, synthesizing `Created` for every existing entry), and registers
/// the wake pipe's read end with `reactor`. `on_event` is called both
/// during bootstrap and for every later readiness-driven event.
pub fn watch(
    base_dir: &Path,
    reactor: &mut Reactor,
    mut on_event: impl FnMut(&mut Reactor, WatchEvent) + 'static,
) -> Result<Watcher, WatchError> {
    std::fs::create_dir_all(base_dir).map_err(WatchError::CreateDir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(base_dir) {
            let mut perms = meta.permissions();
            perms.set_mode(0o700);
            let _ = std::fs::set_permissions(base_dir, perms);
        }
    }

    let (read_fd, write_fd) = make_pipe().map_err(WatchError::Pipe)?;
    let queue: Arc<Mutex<VecDeque<RawEvent>>> = Arc::new(Mutex::new(VecDeque::new()));
    let queue_cb = queue.clone();
    let base_dir_owned = base_dir.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("filesystem watch error: {e}");
                return;
            }
        };
        let mut pushed = false;
        for path in &event.paths {
            let raw = match event.kind {
                EventKind::Create(_) => Some(RawEvent::Created(path.clone())),
                EventKind::Remove(_) if *path == base_dir_owned => Some(RawEvent::SelfDeleted),
                EventKind::Remove(_) => Some(RawEvent::Deleted(path.clone())),
                _ => None,
            };
            if let Some(raw) = raw {
                queue_cb.lock().unwrap_or_else(|e| e.into_inner()).push_back(raw);
                pushed = true;
            }
        }
        if pushed {
            wake(write_fd);
        }
    })
    .map_err(WatchError::Notify)?;
    watcher.watch(base_dir, RecursiveMode::NonRecursive).map_err(WatchError::Notify)?;

    // Bootstrap: synthesize Created for every existing entry, alphabetical
    // order, before arming the readiness-driven path (spec.md §4.5).
    let mut entries: Vec<OsString> = std::fs::read_dir(base_dir)
        .map_err(WatchError::Scan)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    entries.sort();
    for name in entries {
        on_event(reactor, WatchEvent::Created(name));
    }

    let queue_job = queue;
    reactor.post_job(read_fd, Op::Read, JobMode::Persistent, move |reactor, fd, _op| {
        drain_pipe(fd);
        loop {
            let item = queue_job.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            let Some(raw) = item else { break };
            let event = match raw {
                RawEvent::Created(p) => {
                    p.file_name().map(|n| WatchEvent::Created(n.to_os_string()))
                }
                RawEvent::Deleted(p) => {
                    p.file_name().map(|n| WatchEvent::Deleted(n.to_os_string()))
                }
                RawEvent::SelfDeleted => Some(WatchEvent::SelfDeleted),
            };
            if let Some(event) = event {
                on_event(reactor, event);
            }
        }
    })?;

    Ok(Watcher { _inner: watcher, read_fd, write_fd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn bootstrap_scan_is_alphabetical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("b.sock")).unwrap();
        std::fs::File::create(dir.path().join("a.sock")).unwrap();
        let mut reactor = Reactor::new().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _watcher = watch(dir.path(), &mut reactor, move |_r, ev| {
            if let WatchEvent::Created(name) = ev {
                seen2.borrow_mut().push(name.to_string_lossy().into_owned());
            }
        })
        .unwrap();
        assert_eq!(*seen.borrow(), vec!["a.sock".to_string(), "b.sock".to_string()]);
    }

    #[test]
    fn create_and_delete_are_observed() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let events2 = events.clone();
        let _watcher = watch(dir.path(), &mut reactor, move |_r, ev| {
            events2.borrow_mut().push(format!("{ev:?}"));
        })
        .unwrap();

        let file = dir.path().join("x.sock");
        std::fs::File::create(&file).unwrap();
        std::fs::remove_file(&file).unwrap();

        for _ in 0..40 {
            reactor.stop(true);
            reactor.run().unwrap();
            if events.borrow().len() >= 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(25));
        }
        let joined = events.borrow().join(",");
        assert!(joined.contains("Created"), "events: {joined}");
        assert!(joined.contains("Deleted"), "events: {joined}");
    }
}
