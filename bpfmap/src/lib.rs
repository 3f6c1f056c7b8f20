//! Thin, typed access to the Linux bpf(2) map commands.
//!
//! Operations work on raw descriptors and report the kernel's answer as a
//! [`Status`]: a non-negative value on success, the negated errno otherwise.
//! [`MapFd`] owns a descriptor and releases it exactly once.

pub mod batch;
pub mod fd;
pub mod info;
pub mod map;
pub mod status;
mod sys;
pub mod version;

pub use bpfmap_common::{elem_flags, map_flags, map_type};

pub use crate::{
    batch::{
        BatchCursor, BatchIter, BatchOptions, map_delete_batch, map_lookup_and_delete_batch,
        map_lookup_batch, map_update_batch,
    },
    fd::{FdError, MapFd},
    info::{MapInfo, map_get_info_by_fd},
    map::{
        MapCreateOpts, MapKeys, map_create, map_delete_elem, map_freeze, map_get_fd_by_id,
        map_get_next_id, map_get_next_key, map_lookup_and_delete_elem, map_lookup_elem,
        map_update_elem, obj_get, obj_pin,
    },
    status::Status,
    version::{KernelVersion, Version, version},
};

/// Error numbers callers commonly compare a [`Status`] against.
pub mod errno {
    pub use libc::{E2BIG, EBADF, EBUSY, EEXIST, EFAULT, EINVAL, ENOENT, ENOSYS, EPERM};
}
