//! Thin `libc` wrappers for the listening socket and the readiness poll.

use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem};

use libc::{
    AF_INET, INADDR_ANY, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, SOMAXCONN, c_int, nfds_t, pollfd,
    sockaddr, sockaddr_in, socklen_t,
};

use crate::error::StartError;

/// Creates, binds and listens on `0.0.0.0:port`.
///
/// Each step reports its own failure. The descriptor is owned from the
/// moment it exists, so a failed step closes it.
pub(crate) fn open_listener(port: u16) -> Result<TcpListener, StartError> {
    let fd = sys_socket().map_err(StartError::Create)?;
    sys_set_reuseaddr(&fd).map_err(StartError::Configure)?;
    sys_bind_any(&fd, port).map_err(|source| StartError::Bind { port, source })?;
    sys_listen(&fd).map_err(StartError::Listen)?;

    Ok(TcpListener::from(fd))
}

/// Calls `poll(2)` on `fds`, returning the number of ready entries.
///
/// An interrupted call reports zero ready entries.
pub(crate) fn sys_poll(fds: &mut [pollfd], timeout: Duration) -> io::Result<usize> {
    let timeout_ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(rc as usize)
}

fn sys_socket() -> io::Result<OwnedFd> {
    let fd: RawFd = unsafe { libc::socket(AF_INET, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn sys_set_reuseaddr(fd: &OwnedFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn sys_bind_any(fd: &OwnedFd, port: u16) -> io::Result<()> {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = AF_INET as _;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = INADDR_ANY.to_be();

    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const sockaddr_in as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn sys_listen(fd: &OwnedFd) -> io::Result<()> {
    let rc = unsafe { libc::listen(fd.as_raw_fd(), SOMAXCONN) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
