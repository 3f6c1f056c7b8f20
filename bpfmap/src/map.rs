//! Stateless map operations.
//!
//! Every function issues exactly one kernel call against a raw descriptor and
//! reports the outcome as a [`Status`]. Key and value buffers are trusted to
//! match the map's key and value sizes; nothing here checks them.

use std::{
    ffi::CString,
    os::{fd::RawFd, unix::ffi::OsStrExt},
    path::Path,
    ptr,
};

use bpfmap_common::{BPF_OBJ_NAME_LEN, BpfAttr, cmd, map_flags::BPF_F_NUMA_NODE};

use crate::{
    status::Status,
    sys::{self, Syscall},
};

/// Creation parameters for [`map_create`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MapCreateOpts {
    pub map_type: u32,
    pub map_flags: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub numa_node: Option<u32>,
    pub inner_map_fd: Option<RawFd>,
    pub map_ifindex: Option<u32>,
    /// Truncated to 15 bytes by the kernel ABI.
    pub name: Option<String>,
}

impl MapCreateOpts {
    pub fn new(map_type: u32, key_size: u32, value_size: u32, max_entries: u32) -> Self {
        Self {
            map_type,
            key_size,
            value_size,
            max_entries,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_map_flags(mut self, flags: u32) -> Self {
        self.map_flags = flags;
        self
    }

    pub fn with_numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }

    pub fn with_inner_map_fd(mut self, fd: RawFd) -> Self {
        self.inner_map_fd = Some(fd);
        self
    }

    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.map_ifindex = Some(ifindex);
        self
    }
}

fn status(result: sys::SysResult) -> Status {
    Status::from_result(result)
}

/// Creates a map. A successful status carries the new descriptor.
pub fn map_create(opts: &MapCreateOpts) -> Status {
    let mut attr = BpfAttr::zeroed();
    let u = unsafe { &mut attr.map_create };
    u.map_type = opts.map_type;
    u.key_size = opts.key_size;
    u.value_size = opts.value_size;
    u.max_entries = opts.max_entries;
    u.map_flags = opts.map_flags;
    if let Some(node) = opts.numa_node {
        u.map_flags |= BPF_F_NUMA_NODE;
        u.numa_node = node;
    }
    if let Some(fd) = opts.inner_map_fd {
        u.inner_map_fd = fd as u32;
    }
    if let Some(ifindex) = opts.map_ifindex {
        u.map_ifindex = ifindex;
    }
    if let Some(name) = &opts.name {
        u.map_name = object_name(name);
    }
    status(sys::bpf(cmd::BPF_MAP_CREATE, &mut attr))
}

/// Copies `name` into a NUL-terminated kernel name buffer, truncating.
fn object_name(name: &str) -> [u8; BPF_OBJ_NAME_LEN] {
    let mut buf = [0u8; BPF_OBJ_NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(BPF_OBJ_NAME_LEN - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

fn elem_attr(fd: RawFd, key: *const u8, value: u64, flags: u64) -> BpfAttr {
    let mut attr = BpfAttr::zeroed();
    let u = unsafe { &mut attr.map_elem };
    u.map_fd = fd as u32;
    u.key = key as u64;
    u.value = value;
    u.flags = flags;
    attr
}

pub fn map_update_elem(fd: RawFd, key: &[u8], value: &[u8], flags: u64) -> Status {
    let mut attr = elem_attr(fd, key.as_ptr(), value.as_ptr() as u64, flags);
    status(sys::bpf(cmd::BPF_MAP_UPDATE_ELEM, &mut attr))
}

pub fn map_lookup_elem(fd: RawFd, key: &[u8], value: &mut [u8], flags: u64) -> Status {
    let mut attr = elem_attr(fd, key.as_ptr(), value.as_mut_ptr() as u64, flags);
    status(sys::bpf(cmd::BPF_MAP_LOOKUP_ELEM, &mut attr))
}

/// Looks up and removes `key` in one atomic kernel call.
pub fn map_lookup_and_delete_elem(fd: RawFd, key: &[u8], value: &mut [u8]) -> Status {
    let mut attr = elem_attr(fd, key.as_ptr(), value.as_mut_ptr() as u64, 0);
    status(sys::bpf(cmd::BPF_MAP_LOOKUP_AND_DELETE_ELEM, &mut attr))
}

pub fn map_delete_elem(fd: RawFd, key: &[u8]) -> Status {
    let mut attr = elem_attr(fd, key.as_ptr(), 0, 0);
    status(sys::bpf(cmd::BPF_MAP_DELETE_ELEM, &mut attr))
}

/// Writes the successor of `key` into `next_key`, or the first key when `key`
/// is `None`. Fails with `ENOENT` past the last key.
pub fn map_get_next_key(fd: RawFd, key: Option<&[u8]>, next_key: &mut [u8]) -> Status {
    let key = key.map_or(ptr::null(), <[u8]>::as_ptr);
    let mut attr = elem_attr(fd, key, next_key.as_mut_ptr() as u64, 0);
    status(sys::bpf(cmd::BPF_MAP_GET_NEXT_KEY, &mut attr))
}

/// Makes the map read-only for userspace from now on.
pub fn map_freeze(fd: RawFd) -> Status {
    let mut attr = elem_attr(fd, ptr::null(), 0, 0);
    status(sys::bpf(cmd::BPF_MAP_FREEZE, &mut attr))
}

/// Opens a new descriptor for the map with the given id.
pub fn map_get_fd_by_id(id: u32) -> Status {
    let mut attr = BpfAttr::zeroed();
    attr.get_id.id = id;
    status(sys::bpf(cmd::BPF_MAP_GET_FD_BY_ID, &mut attr))
}

/// Returns the first map id greater than `start_id` alongside the status;
/// the id is only meaningful when the status is ok.
pub fn map_get_next_id(start_id: u32) -> (Status, u32) {
    let mut attr = BpfAttr::zeroed();
    attr.get_id.id = start_id;
    let ret = status(sys::bpf(cmd::BPF_MAP_GET_NEXT_ID, &mut attr));
    (ret, unsafe { attr.get_id.next_id })
}

fn obj_attr(fd: RawFd, path: &Path) -> Result<(BpfAttr, CString), Status> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Status::from_errno(libc::EINVAL))?;
    let mut attr = BpfAttr::zeroed();
    let u = unsafe { &mut attr.obj };
    u.pathname = path.as_ptr() as u64;
    u.bpf_fd = fd as u32;
    // `path` moves with the attr so the pointer stays valid for the call.
    Ok((attr, path))
}

/// Opens the object pinned at `path` on a BPF filesystem.
pub fn obj_get(path: impl AsRef<Path>) -> Status {
    match obj_attr(0, path.as_ref()) {
        Ok((mut attr, _path)) => status(sys::bpf(cmd::BPF_OBJ_GET, &mut attr)),
        Err(status) => status,
    }
}

/// Pins the object behind `fd` at `path`.
pub fn obj_pin(fd: RawFd, path: impl AsRef<Path>) -> Status {
    match obj_attr(fd, path.as_ref()) {
        Ok((mut attr, _path)) => status(sys::bpf(cmd::BPF_OBJ_PIN, &mut attr)),
        Err(status) => status,
    }
}

/// Duplicates `fd`; the new descriptor refers to the same kernel object.
pub fn dup_fd(fd: RawFd) -> Status {
    status(sys::syscall(Syscall::DupFd { fd }))
}

/// Walks a map's keys with [`map_get_next_key`].
///
/// Yields `Err` with the failing status once and then stops; `ENOENT` at the
/// end of the table ends the walk without an error.
pub struct MapKeys {
    fd: RawFd,
    key: Option<Vec<u8>>,
    key_size: usize,
    done: bool,
}

impl MapKeys {
    pub fn new(fd: RawFd, key_size: u32) -> Self {
        Self {
            fd,
            key: None,
            key_size: key_size as usize,
            done: false,
        }
    }
}

impl Iterator for MapKeys {
    type Item = Result<Vec<u8>, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut next = vec![0u8; self.key_size];
        let ret = map_get_next_key(self.fd, self.key.as_deref(), &mut next);
        if ret.is_ok() {
            self.key = Some(next.clone());
            return Some(Ok(next));
        }
        self.done = true;
        if ret.is_errno(libc::ENOENT) {
            None
        } else {
            Some(Err(ret))
        }
    }
}
