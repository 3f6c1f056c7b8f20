use std::{
    fmt, io,
    os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd},
};

use log::warn;
use thiserror::Error;

use crate::{
    map,
    status::Status,
    sys::{self, Syscall},
};

#[derive(Debug, Error)]
pub enum FdError {
    /// The handle was closed and no longer owns a descriptor.
    #[error("descriptor handle already closed")]
    Closed,

    #[error("`{call}` failed")]
    SyscallError {
        call: &'static str,
        #[source]
        io_error: io::Error,
    },
}

/// Owns exactly one kernel object descriptor.
///
/// Closing is terminal and idempotent: once [`close`](MapFd::close) has run,
/// whether or not the kernel accepted it, the handle never touches the
/// descriptor again. Dropping the handle closes it.
pub struct MapFd {
    fd: Option<RawFd>,
}

impl MapFd {
    /// Wraps an already-obtained descriptor. The value is not validated.
    pub fn new(fd: RawFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// Takes ownership of the descriptor carried by a successful `status`.
    pub fn from_status(call: &'static str, status: Status) -> Result<Self, FdError> {
        status
            .into_result()
            .map(|fd| Self::new(fd as RawFd))
            .map_err(|io_error| FdError::SyscallError { call, io_error })
    }

    pub fn value(&self) -> Result<RawFd, FdError> {
        self.fd.ok_or(FdError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    pub fn close(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };
        if let Err((code, io_error)) = sys::syscall(Syscall::Close { fd }) {
            warn!("close of descriptor {fd} returned {code}: {io_error}");
        }
    }

    /// Gives up ownership without closing.
    pub fn into_raw(mut self) -> Result<RawFd, FdError> {
        self.fd.take().ok_or(FdError::Closed)
    }

    /// Duplicates the descriptor; the new handle refers to the same object.
    pub fn try_clone(&self) -> Result<Self, FdError> {
        Self::from_status("dup", map::dup_fd(self.value()?))
    }
}

impl Drop for MapFd {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for MapFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fd {
            Some(fd) => write!(f, "valid: {fd}"),
            None => write!(f, "closed"),
        }
    }
}

impl fmt::Debug for MapFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapFd({self})")
    }
}

impl From<OwnedFd> for MapFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd.into_raw_fd())
    }
}

impl TryFrom<MapFd> for OwnedFd {
    type Error = FdError;

    fn try_from(fd: MapFd) -> Result<Self, Self::Error> {
        let raw = fd.into_raw()?;
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }
}
