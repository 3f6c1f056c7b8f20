//! In-memory stand-in for the kernel's hash map commands, installed through
//! [`override_syscall`]. Entries are kept in insertion order, which serves as
//! the table's iteration order.

use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{CStr, CString},
    mem, ptr, slice,
};

use bpfmap_common::{
    BPF_OBJ_NAME_LEN, BpfAttr, MapInfoRecord, cmd,
    elem_flags::{BPF_EXIST, BPF_F_LOCK, BPF_NOEXIST},
    map_type::BPF_MAP_TYPE_HASH,
};
use libc::{c_long, c_int};

use super::{SysResult, Syscall, errno, override_syscall};

#[derive(Debug)]
pub(crate) struct FakeMap {
    pub(crate) id: u32,
    pub(crate) map_type: u32,
    pub(crate) key_size: u32,
    pub(crate) value_size: u32,
    pub(crate) max_entries: u32,
    pub(crate) map_flags: u32,
    pub(crate) numa_node: u32,
    pub(crate) ifindex: u32,
    pub(crate) name: [u8; BPF_OBJ_NAME_LEN],
    pub(crate) frozen: bool,
    pub(crate) entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl FakeMap {
    fn position(&self, key: &[u8]) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn update(&mut self, key: Vec<u8>, value: Vec<u8>, flags: u64) -> Result<(), c_int> {
        if self.frozen {
            return Err(libc::EPERM);
        }
        if flags & !(BPF_NOEXIST | BPF_EXIST | BPF_F_LOCK) != 0 {
            return Err(libc::EINVAL);
        }
        match (self.position(&key), flags & (BPF_NOEXIST | BPF_EXIST)) {
            (Some(_), BPF_NOEXIST) => Err(libc::EEXIST),
            (None, BPF_EXIST) => Err(libc::ENOENT),
            (Some(idx), _) => {
                self.entries[idx].1 = value;
                Ok(())
            }
            (None, _) if self.entries.len() >= self.max_entries as usize => Err(libc::E2BIG),
            (None, _) => {
                self.entries.push((key, value));
                Ok(())
            }
        }
    }

    fn delete(&mut self, key: &[u8]) -> Result<Vec<u8>, c_int> {
        if self.frozen {
            return Err(libc::EPERM);
        }
        let idx = self.position(key).ok_or(libc::ENOENT)?;
        Ok(self.entries.remove(idx).1)
    }

    fn info(&self) -> MapInfoRecord {
        MapInfoRecord {
            map_type: self.map_type,
            id: self.id,
            key_size: self.key_size,
            value_size: self.value_size,
            max_entries: self.max_entries,
            map_flags: self.map_flags,
            name: self.name,
            ifindex: self.ifindex,
            netns_dev: 4,
            netns_ino: 4026531840,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeKernel {
    maps: Vec<FakeMap>,
    fds: HashMap<c_int, usize>,
    pins: HashMap<CString, usize>,
    next_fd: c_int,
    /// Caps the `bpf_map_info` length written back, emulating older kernels.
    pub(crate) info_len_limit: Option<u32>,
    /// Elements per hash bucket. Batch lookups asking for fewer than this
    /// fail with `ENOSPC` and a zero count, as the kernel does.
    pub(crate) bucket_size: Option<u32>,
}

thread_local! {
    static KERNEL: RefCell<FakeKernel> = RefCell::new(FakeKernel::default());
}

/// Resets the fake kernel for this thread and routes syscalls to it.
pub(crate) fn install() {
    KERNEL.with(|kernel| *kernel.borrow_mut() = FakeKernel::default());
    override_syscall(fake_syscall);
}

pub(crate) fn with<R>(f: impl FnOnce(&mut FakeKernel) -> R) -> R {
    KERNEL.with(|kernel| f(&mut kernel.borrow_mut()))
}

fn fake_syscall(call: Syscall<'_>) -> SysResult {
    with(|kernel| kernel.handle(call))
}

fn fail(code: c_int) -> SysResult {
    errno(code)
}

unsafe fn read(ptr: u64, len: u32) -> Vec<u8> {
    unsafe { slice::from_raw_parts(ptr as *const u8, len as usize).to_vec() }
}

unsafe fn write(ptr: u64, data: &[u8]) {
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len()) }
}

impl FakeKernel {
    pub(crate) fn map_for_fd(&self, fd: c_int) -> Option<&FakeMap> {
        self.fds.get(&fd).map(|slot| &self.maps[*slot])
    }

    fn open(&mut self, slot: usize) -> c_long {
        self.next_fd += 1;
        let fd = 100 + self.next_fd;
        self.fds.insert(fd, slot);
        fd as c_long
    }

    fn slot(&self, fd: u32) -> Result<usize, c_int> {
        self.fds.get(&(fd as c_int)).copied().ok_or(libc::EBADF)
    }

    fn handle(&mut self, call: Syscall<'_>) -> SysResult {
        match call {
            Syscall::Close { fd } => match self.fds.remove(&fd) {
                Some(_) => Ok(0),
                None => fail(libc::EBADF),
            },
            Syscall::DupFd { fd } => match self.fds.get(&fd).copied() {
                Some(slot) => Ok(self.open(slot)),
                None => fail(libc::EBADF),
            },
            Syscall::Bpf { cmd, attr } => match unsafe { self.bpf(cmd, attr) } {
                Ok(ret) => Ok(ret),
                Err(code) => fail(code),
            },
        }
    }

    unsafe fn bpf(&mut self, cmd: u32, attr: &mut BpfAttr) -> Result<c_long, c_int> {
        unsafe {
            match cmd {
                cmd::BPF_MAP_CREATE => self.create(attr),
                cmd::BPF_MAP_UPDATE_ELEM => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    let key = read(a.key, map.key_size);
                    let value = read(a.value, map.value_size);
                    map.update(key, value, a.flags).map(|()| 0)
                }
                cmd::BPF_MAP_LOOKUP_ELEM => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &self.maps[slot];
                    let key = read(a.key, map.key_size);
                    let idx = map.position(&key).ok_or(libc::ENOENT)?;
                    write(a.value, &map.entries[idx].1);
                    Ok(0)
                }
                cmd::BPF_MAP_LOOKUP_AND_DELETE_ELEM => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    let key = read(a.key, map.key_size);
                    let value = map.delete(&key)?;
                    write(a.value, &value);
                    Ok(0)
                }
                cmd::BPF_MAP_DELETE_ELEM => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    let key = read(a.key, map.key_size);
                    map.delete(&key).map(|_| 0)
                }
                cmd::BPF_MAP_GET_NEXT_KEY => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &self.maps[slot];
                    // An unknown current key restarts from the first key.
                    let next = match a.key {
                        0 => 0,
                        key => match map.position(&read(key, map.key_size)) {
                            Some(idx) => idx + 1,
                            None => 0,
                        },
                    };
                    let (key, _) = map.entries.get(next).ok_or(libc::ENOENT)?;
                    write(a.value, key);
                    Ok(0)
                }
                cmd::BPF_MAP_FREEZE => {
                    let a = attr.map_elem;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    if map.frozen {
                        return Err(libc::EBUSY);
                    }
                    map.frozen = true;
                    Ok(0)
                }
                cmd::BPF_MAP_LOOKUP_BATCH => self.lookup_batch(attr, false),
                cmd::BPF_MAP_LOOKUP_AND_DELETE_BATCH => self.lookup_batch(attr, true),
                cmd::BPF_MAP_UPDATE_BATCH => {
                    let a = attr.batch;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    let (ks, vs) = (map.key_size, map.value_size);
                    for i in 0..a.count {
                        let key = read(a.keys + (i * ks) as u64, ks);
                        let value = read(a.values + (i * vs) as u64, vs);
                        if let Err(code) = map.update(key, value, a.elem_flags) {
                            attr.batch.count = i;
                            return Err(code);
                        }
                    }
                    Ok(0)
                }
                cmd::BPF_MAP_DELETE_BATCH => {
                    let a = attr.batch;
                    let slot = self.slot(a.map_fd)?;
                    let map = &mut self.maps[slot];
                    let ks = map.key_size;
                    for i in 0..a.count {
                        let key = read(a.keys + (i * ks) as u64, ks);
                        if let Err(code) = map.delete(&key) {
                            attr.batch.count = i;
                            return Err(code);
                        }
                    }
                    Ok(0)
                }
                cmd::BPF_OBJ_GET_INFO_BY_FD => {
                    let a = attr.info;
                    let slot = self.slot(a.bpf_fd)?;
                    let map = &self.maps[slot];
                    let record = map.info();
                    let full = mem::size_of::<MapInfoRecord>() as u32;
                    let len = a
                        .info_len
                        .min(full)
                        .min(self.info_len_limit.unwrap_or(full));
                    let bytes = slice::from_raw_parts(
                        (&record as *const MapInfoRecord).cast::<u8>(),
                        len as usize,
                    );
                    write(a.info, bytes);
                    attr.info.info_len = len;
                    Ok(0)
                }
                cmd::BPF_MAP_GET_FD_BY_ID => {
                    let id = attr.get_id.id;
                    let slot = self
                        .maps
                        .iter()
                        .position(|m| m.id == id)
                        .ok_or(libc::ENOENT)?;
                    Ok(self.open(slot))
                }
                cmd::BPF_MAP_GET_NEXT_ID => {
                    let start = attr.get_id.id;
                    let next = self
                        .maps
                        .iter()
                        .map(|m| m.id)
                        .filter(|id| *id > start)
                        .min()
                        .ok_or(libc::ENOENT)?;
                    attr.get_id.next_id = next;
                    Ok(0)
                }
                cmd::BPF_OBJ_PIN => {
                    let a = attr.obj;
                    let slot = self.slot(a.bpf_fd)?;
                    let path = CStr::from_ptr(a.pathname as *const libc::c_char).to_owned();
                    if self.pins.contains_key(&path) {
                        return Err(libc::EEXIST);
                    }
                    self.pins.insert(path, slot);
                    Ok(0)
                }
                cmd::BPF_OBJ_GET => {
                    let a = attr.obj;
                    let path = CStr::from_ptr(a.pathname as *const libc::c_char);
                    let slot = *self.pins.get(path).ok_or(libc::ENOENT)?;
                    Ok(self.open(slot))
                }
                _ => Err(libc::EINVAL),
            }
        }
    }

    unsafe fn create(&mut self, attr: &BpfAttr) -> Result<c_long, c_int> {
        let a = unsafe { attr.map_create };
        if a.map_type != BPF_MAP_TYPE_HASH {
            return Err(libc::EINVAL);
        }
        if a.key_size == 0 || a.value_size == 0 || a.max_entries == 0 {
            return Err(libc::EINVAL);
        }
        self.maps.push(FakeMap {
            id: 1000 + self.maps.len() as u32,
            map_type: a.map_type,
            key_size: a.key_size,
            value_size: a.value_size,
            max_entries: a.max_entries,
            map_flags: a.map_flags,
            numa_node: a.numa_node,
            ifindex: a.map_ifindex,
            name: a.map_name,
            frozen: false,
            entries: Vec::new(),
        });
        Ok(self.open(self.maps.len() - 1))
    }

    /// The batch token is the entry index to resume from, stored in the
    /// first four bytes of the cursor.
    unsafe fn lookup_batch(&mut self, attr: &mut BpfAttr, delete: bool) -> Result<c_long, c_int> {
        unsafe {
            let a = attr.batch;
            let bucket_size = self.bucket_size;
            let slot = self.slot(a.map_fd)?;
            let map = &mut self.maps[slot];
            if delete && map.frozen {
                return Err(libc::EPERM);
            }
            if a.count == 0 {
                return Ok(0);
            }
            if a.out_batch == 0 {
                return Err(libc::EFAULT);
            }
            let start = match a.in_batch {
                0 => 0,
                ptr => u32::from_ne_bytes(read(ptr, 4).try_into().unwrap_or_default()) as usize,
            };
            let start = start.min(map.entries.len());
            if let Some(bucket) = bucket_size
                && a.count < bucket
                && start < map.entries.len()
            {
                attr.batch.count = 0;
                return Err(libc::ENOSPC);
            }
            let (ks, vs) = (map.key_size, map.value_size);
            let available = map.entries.len().saturating_sub(start);
            let n = available.min(a.count as usize);
            for (i, (key, value)) in map.entries[start..start + n].iter().enumerate() {
                write(a.keys + (i as u32 * ks) as u64, key);
                write(a.values + (i as u32 * vs) as u64, value);
            }
            let resume = if delete {
                map.entries.drain(start..start + n);
                start
            } else {
                start + n
            };
            write(a.out_batch, &(resume as u32).to_ne_bytes());
            attr.batch.count = n as u32;
            if n == available {
                return Err(libc::ENOENT);
            }
            Ok(0)
        }
    }
}
