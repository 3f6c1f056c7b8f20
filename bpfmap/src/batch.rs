//! Batched map operations.
//!
//! A batch call processes up to `count` elements in one kernel invocation and
//! reports how many it actually handled through the returned count. The
//! count is meaningful even when the status is negative: a batch that fails
//! half-way still reports the elements it got through.

use std::{os::fd::RawFd, ptr};

use bpfmap_common::{BpfAttr, cmd};
use log::debug;

use crate::{status::Status, sys};

/// Options threaded through every batch call. The default is "no special
/// behaviour", so passing `&BatchOptions::default()` is always safe.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchOptions {
    /// Per-element flags, e.g. `BPF_F_LOCK`.
    pub elem_flags: u64,
    /// Call-wide flags.
    pub flags: u64,
}

impl BatchOptions {
    pub fn with_elem_flags(mut self, elem_flags: u64) -> Self {
        self.elem_flags = elem_flags;
        self
    }

    pub fn with_flags(mut self, flags: u64) -> Self {
        self.flags = flags;
        self
    }
}

/// Opaque resumption token for batch lookups.
///
/// The kernel defines the token's contents per map type; callers only pass
/// the `out` side of one call as the `in` side of the next.
#[derive(Clone, Debug)]
pub struct BatchCursor {
    token: Vec<u8>,
    started: bool,
}

impl BatchCursor {
    /// A cursor for a map with the given key size. Hash maps store a 32-bit
    /// bucket index in the token, so it is never smaller than that.
    pub fn new(key_size: u32) -> Self {
        let len = (key_size as usize).max(size_of::<u32>());
        Self {
            token: vec![0; len],
            started: false,
        }
    }

    /// The `in` cursor: absent until a call has filled in the token.
    pub fn as_in(&self) -> Option<&[u8]> {
        self.started.then_some(self.token.as_slice())
    }

    /// Splits into the `in` and `out` cursors for one call, using `scratch`
    /// as the `out` buffer. Call [`advance`](Self::advance) afterwards.
    pub fn split<'a>(&'a self, scratch: &'a mut Vec<u8>) -> (Option<&'a [u8]>, &'a mut [u8]) {
        scratch.clear();
        scratch.resize(self.token.len(), 0);
        (self.as_in(), scratch.as_mut_slice())
    }

    /// Adopts the `out` token written by the last call.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the token. The scratch buffer filled
    /// through [`split`](Self::split) always has the right length.
    pub fn advance(&mut self, out: &[u8]) {
        let len = self.token.len();
        self.token.copy_from_slice(&out[..len]);
        self.started = true;
    }

    pub fn reset(&mut self) {
        self.token.fill(0);
        self.started = false;
    }
}

fn opt_ptr(buf: Option<&[u8]>) -> u64 {
    buf.map_or(ptr::null(), <[u8]>::as_ptr) as u64
}

#[allow(clippy::too_many_arguments)]
fn batch(
    cmd: u32,
    fd: RawFd,
    in_batch: u64,
    out_batch: u64,
    keys: u64,
    values: u64,
    count: u32,
    opts: &BatchOptions,
) -> (Status, u32) {
    let mut attr = BpfAttr::zeroed();
    let u = unsafe { &mut attr.batch };
    u.map_fd = fd as u32;
    u.in_batch = in_batch;
    u.out_batch = out_batch;
    u.keys = keys;
    u.values = values;
    u.count = count;
    u.elem_flags = opts.elem_flags;
    u.flags = opts.flags;
    let ret = Status::from_result(sys::bpf(cmd, &mut attr));
    // The kernel writes the processed count back on success and failure.
    (ret, unsafe { attr.batch.count })
}

/// Deletes up to `count` keys from `keys` (a packed array of key-sized
/// entries), in array order.
pub fn map_delete_batch(
    fd: RawFd,
    keys: &[u8],
    count: u32,
    opts: &BatchOptions,
) -> (Status, u32) {
    batch(
        cmd::BPF_MAP_DELETE_BATCH,
        fd,
        0,
        0,
        keys.as_ptr() as u64,
        0,
        count,
        opts,
    )
}

/// Reads up to `count` elements in iteration order, starting after
/// `in_batch` (or from the beginning when it is `None`), and writes the
/// resumption token to `out_batch`. Fails with `ENOENT` once the table is
/// exhausted; the returned count covers the elements filled by this call.
pub fn map_lookup_batch(
    fd: RawFd,
    in_batch: Option<&[u8]>,
    out_batch: &mut [u8],
    keys: &mut [u8],
    values: &mut [u8],
    count: u32,
    opts: &BatchOptions,
) -> (Status, u32) {
    batch(
        cmd::BPF_MAP_LOOKUP_BATCH,
        fd,
        opt_ptr(in_batch),
        out_batch.as_mut_ptr() as u64,
        keys.as_mut_ptr() as u64,
        values.as_mut_ptr() as u64,
        count,
        opts,
    )
}

/// Same as [`map_lookup_batch`], removing each element it returns.
pub fn map_lookup_and_delete_batch(
    fd: RawFd,
    in_batch: Option<&[u8]>,
    out_batch: &mut [u8],
    keys: &mut [u8],
    values: &mut [u8],
    count: u32,
    opts: &BatchOptions,
) -> (Status, u32) {
    batch(
        cmd::BPF_MAP_LOOKUP_AND_DELETE_BATCH,
        fd,
        opt_ptr(in_batch),
        out_batch.as_mut_ptr() as u64,
        keys.as_mut_ptr() as u64,
        values.as_mut_ptr() as u64,
        count,
        opts,
    )
}

/// Inserts or overwrites up to `count` key/value pairs.
pub fn map_update_batch(
    fd: RawFd,
    keys: &[u8],
    values: &[u8],
    count: u32,
    opts: &BatchOptions,
) -> (Status, u32) {
    batch(
        cmd::BPF_MAP_UPDATE_BATCH,
        fd,
        0,
        0,
        keys.as_ptr() as u64,
        values.as_ptr() as u64,
        count,
        opts,
    )
}

/// Upper bound for the chunk a [`BatchIter`] grows to.
const MAX_BATCH_CHUNK: u32 = 1 << 16;

/// Drives [`map_lookup_batch`] over a whole map, one chunk per item.
///
/// Hash maps hand out whole buckets and fail with `ENOSPC` when a bucket
/// holds more elements than the requested chunk. The iterator then doubles
/// its chunk and retries the same position.
pub struct BatchIter {
    fd: RawFd,
    key_size: usize,
    value_size: usize,
    chunk: u32,
    cursor: BatchCursor,
    scratch: Vec<u8>,
    opts: BatchOptions,
    done: bool,
}

impl BatchIter {
    pub fn new(fd: RawFd, key_size: u32, value_size: u32, chunk: u32) -> Self {
        Self {
            fd,
            key_size: key_size as usize,
            value_size: value_size as usize,
            chunk: chunk.max(1),
            cursor: BatchCursor::new(key_size),
            scratch: Vec::new(),
            opts: BatchOptions::default(),
            done: false,
        }
    }

    pub fn with_options(mut self, opts: BatchOptions) -> Self {
        self.opts = opts;
        self
    }
}

pub type Entries = Vec<(Vec<u8>, Vec<u8>)>;

impl Iterator for BatchIter {
    type Item = Result<Entries, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (ret, count, keys, values) = loop {
            let mut keys = vec![0u8; self.key_size * self.chunk as usize];
            let mut values = vec![0u8; self.value_size * self.chunk as usize];
            let mut scratch = std::mem::take(&mut self.scratch);
            let (in_batch, out_batch) = self.cursor.split(&mut scratch);
            let (ret, count) = map_lookup_batch(
                self.fd,
                in_batch,
                out_batch,
                &mut keys,
                &mut values,
                self.chunk,
                &self.opts,
            );
            self.scratch = scratch;
            if ret.is_errno(libc::ENOSPC) && count == 0 && self.chunk < MAX_BATCH_CHUNK {
                self.chunk = self.chunk.saturating_mul(2).min(MAX_BATCH_CHUNK);
                debug!("bucket exceeds batch chunk, retrying with {}", self.chunk);
                continue;
            }
            break (ret, count, keys, values);
        };
        if ret.is_ok() {
            self.cursor.advance(&self.scratch);
        } else if ret.is_errno(libc::ENOENT) {
            self.done = true;
        } else {
            self.done = true;
            return Some(Err(ret));
        }

        let count = count as usize;
        if count == 0 && self.done {
            return None;
        }
        let entries = keys
            .chunks_exact(self.key_size)
            .zip(values.chunks_exact(self.value_size))
            .take(count)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        Some(Ok(entries))
    }
}
