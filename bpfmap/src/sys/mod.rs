//! The single point of contact with the kernel.
//!
//! Every map operation funnels through [`syscall`], which reads `errno`
//! immediately after the call returns and hands it back as part of the
//! result. Nothing above this module looks at the process-wide error state.

#[cfg(test)]
pub(crate) mod fake;

use std::{io, os::fd::RawFd};

#[cfg(test)]
use std::cell::RefCell;

use bpfmap_common::BpfAttr;
use libc::c_long;
use log::debug;

pub(crate) type SysResult = Result<c_long, (c_long, io::Error)>;

pub(crate) enum Syscall<'a> {
    Bpf { cmd: u32, attr: &'a mut BpfAttr },
    Close { fd: RawFd },
    DupFd { fd: RawFd },
}

/// Lowest descriptor handed out by [`Syscall::DupFd`], keeping stdio free.
#[cfg_attr(test, allow(dead_code))]
const DUP_MIN_FD: RawFd = 3;

pub(crate) fn bpf(cmd: u32, attr: &mut BpfAttr) -> SysResult {
    let ret = syscall(Syscall::Bpf { cmd, attr });
    if let Err((code, io_error)) = &ret {
        debug!("bpf command {cmd} returned {code}: {io_error}");
    }
    ret
}

pub(crate) fn syscall(call: Syscall<'_>) -> SysResult {
    #[cfg(test)]
    return TEST_SYSCALL.with(|test_impl| {
        let test_impl = *test_impl.borrow();
        test_impl(call)
    });

    #[cfg(not(test))]
    {
        let ret = unsafe {
            match call {
                Syscall::Bpf { cmd, attr } => libc::syscall(
                    libc::SYS_bpf,
                    cmd,
                    attr as *mut BpfAttr,
                    std::mem::size_of::<BpfAttr>(),
                ),
                Syscall::Close { fd } => libc::close(fd) as c_long,
                Syscall::DupFd { fd } => {
                    libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, DUP_MIN_FD) as c_long
                }
            }
        };
        check(ret)
    }
}

/// Converts a raw return value, capturing `errno` on failure. Must run
/// before anything else can touch `errno`.
#[cfg_attr(test, allow(dead_code))]
fn check(ret: c_long) -> SysResult {
    if ret < 0 {
        Err((ret, io::Error::last_os_error()))
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
thread_local! {
    static TEST_SYSCALL: RefCell<fn(Syscall<'_>) -> SysResult> = RefCell::new(test_syscall);
}

#[cfg(test)]
fn test_syscall(call: Syscall<'_>) -> SysResult {
    match call {
        Syscall::Close { .. } => Ok(0),
        _ => Err((-1, io::Error::from_raw_os_error(libc::EINVAL))),
    }
}

#[cfg(test)]
pub(crate) fn override_syscall(call: fn(Syscall<'_>) -> SysResult) {
    TEST_SYSCALL.with(|test_impl| *test_impl.borrow_mut() = call);
}

#[cfg(test)]
pub(crate) fn errno(code: i32) -> SysResult {
    Err((-1, io::Error::from_raw_os_error(code)))
}
