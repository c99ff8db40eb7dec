//! Thin libc wrappers the connection layer needs beyond what `std`'s
//! `UnixListener`/`UnixStream` expose: a fixed accept backlog (spec.md
//! §4.3: "Acceptor backlog: 50"), `FIONREAD`, and `MSG_DONTWAIT |
//! MSG_NOSIGNAL` send/recv.

use std::ffi::CString;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

/// spec.md §4.3: "Acceptor backlog: 50."
pub const ACCEPT_BACKLOG: libc::c_int = 50;

fn sockaddr_un(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    let bytes = c_path.as_bytes_with_nul();
    if bytes.len() > std::mem::size_of::<libc::sockaddr_un>() - std::mem::size_of::<libc::sa_family_t>() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "socket path too long"));
    }
    // SAFETY: zeroed sockaddr_un is a valid representation.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // SAFETY: `sun_path` and `bytes` are both plain byte buffers and `bytes`
    // was just checked to fit.
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            addr.sun_path.as_mut_ptr() as *mut u8,
            bytes.len(),
        );
    }
    let len = (std::mem::size_of::<libc::sa_family_t>() + bytes.len()) as libc::socklen_t;
    Ok((addr, len))
}

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Create a non-blocking, listening UNIX stream socket bound to `path`
/// with `ACCEPT_BACKLOG`, handed back as a `std::os::unix::net::UnixListener`
/// so callers get `accept()` ergonomics for free.
pub fn bind_listener(path: &Path) -> io::Result<UnixListener> {
    let (addr, len) = sockaddr_un(path)?;
    // SAFETY: standard raw socket setup sequence; every return value is checked.
    unsafe {
        let fd = check(libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        ))?;
        let addr_ptr = &addr as *const libc::sockaddr_un as *const libc::sockaddr;
        if check(libc::bind(fd, addr_ptr, len)).is_err() {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        if check(libc::listen(fd, ACCEPT_BACKLOG)).is_err() {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        Ok(UnixListener::from_raw_fd(fd))
    }
}

/// Start a non-blocking connect to `path`. Returns the stream immediately;
/// the caller must wait for writability before the connection is
/// established (spec.md §4.4: "non-blocking connect; connector fires on
/// success").
pub fn connect_nonblocking(path: &Path) -> io::Result<UnixStream> {
    let (addr, len) = sockaddr_un(path)?;
    // SAFETY: see bind_listener.
    unsafe {
        let fd = check(libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        ))?;
        let addr_ptr = &addr as *const libc::sockaddr_un as *const libc::sockaddr;
        let ret = libc::connect(fd, addr_ptr, len);
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock && err.raw_os_error() != Some(libc::EINPROGRESS) {
                libc::close(fd);
                return Err(err);
            }
        }
        Ok(UnixStream::from_raw_fd(fd))
    }
}

/// Bytes currently queued for reading on `fd` (`ioctl(FIONREAD)`). Zero
/// pending, for a stream socket, means the peer has sent EOF.
pub fn pending_bytes(fd: RawFd) -> io::Result<usize> {
    let mut n: libc::c_int = 0;
    // SAFETY: `n` is a valid, correctly sized out-param for FIONREAD.
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n as *mut libc::c_int) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n.max(0) as usize)
}

/// `recv(2)` with `MSG_DONTWAIT`, retrying once in place on `EINTR`.
pub fn recv_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is a valid, exclusively borrowed byte slice for the duration of the call.
        let ret = unsafe {
            libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), libc::MSG_DONTWAIT)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret as usize);
    }
}

/// `send(2)` with `MSG_DONTWAIT | MSG_NOSIGNAL`, retrying once in place on
/// `EINTR` (spec.md §4.3).
pub fn send_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is a valid, immutably borrowed byte slice for the duration of the call.
        let ret = unsafe {
            libc::send(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret as usize);
    }
}
