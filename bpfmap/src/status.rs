use std::{fmt, io};

use crate::sys::SysResult;

/// Normalized outcome of a single map operation.
///
/// Non-negative values are a success or a count (a new descriptor, for the
/// calls that create one). Negative values are the negated OS error number
/// captured right after the failing call, so `-status.value()` compares
/// directly against constants such as [`libc::ENOENT`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);

    pub(crate) fn from_result(result: SysResult) -> Self {
        match result {
            Ok(ret) => Status(ret as i32),
            // An error with no OS code cannot come out of the syscall layer;
            // EIO keeps the status negative if it ever does.
            Err((_, io_error)) => Status(-io_error.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    /// Builds a failure status from a positive errno value.
    pub fn from_errno(errno: i32) -> Self {
        Status(-errno.saturating_abs())
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// The positive OS error number for a failed status.
    pub fn errno(self) -> Option<i32> {
        (self.0 < 0).then_some(-self.0)
    }

    pub fn is_errno(self, errno: i32) -> bool {
        self.errno() == Some(errno)
    }

    /// Converts to a tagged result for callers that prefer `?`.
    pub fn into_result(self) -> io::Result<u32> {
        match self.errno() {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(self.0 as u32),
        }
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno() {
            Some(errno) => write!(f, "{} ({})", self.0, io::Error::from_raw_os_error(errno)),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::errno;

    #[test]
    fn success_passes_value_through() {
        let status = Status::from_result(Ok(5));
        assert_eq!(status.value(), 5);
        assert!(status.is_ok());
        assert_eq!(status.errno(), None);
        assert_eq!(status.into_result().unwrap(), 5);
    }

    #[test]
    fn failure_is_negated_errno() {
        let status = Status::from_result(errno(libc::ENOENT));
        assert_eq!(status.value(), -libc::ENOENT);
        assert!(!status.is_ok());
        assert!(status.is_errno(libc::ENOENT));
        let err = status.into_result().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn raw_return_code_does_not_leak_into_status() {
        // The kernel's return value is -1; only errno matters.
        let status = Status::from_result(Err((-1, io::Error::from_raw_os_error(libc::E2BIG))));
        assert_eq!(status.value(), -libc::E2BIG);
    }

    #[test]
    fn from_errno_accepts_either_sign() {
        assert_eq!(Status::from_errno(libc::EFAULT).value(), -libc::EFAULT);
        assert_eq!(Status::from_errno(-libc::EFAULT).value(), -libc::EFAULT);
    }

    #[test]
    fn from_errno_saturates_at_the_extremes() {
        assert_eq!(Status::from_errno(i32::MIN).value(), -i32::MAX);
        assert_eq!(Status::from_errno(i32::MAX).value(), -i32::MAX);
        assert!(!Status::from_errno(i32::MIN).is_ok());
    }

    #[test]
    fn display_includes_os_message_on_failure() {
        assert_eq!(Status::OK.to_string(), "0");
        let text = Status::from_errno(libc::ENOENT).to_string();
        assert!(text.starts_with(&format!("-{} (", libc::ENOENT)), "{text}");
    }
}
