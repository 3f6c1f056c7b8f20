use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use bpfmap::{
    BatchIter, MapCreateOpts, MapFd, MapInfo, MapKeys, Status, errno, map_create, map_delete_elem,
    map_freeze, map_get_fd_by_id, map_get_info_by_fd, map_get_next_id, map_lookup_elem, map_type,
    obj_get, obj_pin,
};
use log::{debug, warn};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};

const CPU_POSSIBLE: &str = "/sys/devices/system/cpu/possible";

/// How a command locates an existing map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapTarget {
    Pin(PathBuf),
    Id(u32),
}

impl MapTarget {
    pub fn open(&self) -> Result<MapFd> {
        match self {
            MapTarget::Pin(path) => MapFd::from_status("bpf_obj_get", obj_get(path))
                .with_context(|| format!("failed to open pinned map {}", path.display())),
            MapTarget::Id(id) => MapFd::from_status("bpf_map_get_fd_by_id", map_get_fd_by_id(*id))
                .with_context(|| format!("failed to open map id {id}")),
        }
    }
}

/// An open map together with its metadata.
pub struct OpenMap {
    pub fd: MapFd,
    pub info: MapInfo,
}

impl OpenMap {
    pub fn open(target: &MapTarget) -> Result<Self> {
        let fd = target.open()?;
        let info = query_info(&fd)?;
        debug!("opened map {} ({fd}) type {}", info.id, info.map_type);
        Ok(Self { fd, info })
    }

    /// Size of the value buffer a lookup on this map fills in.
    fn value_len(&self) -> Result<usize> {
        let cpus = if is_per_cpu(self.info.map_type) {
            possible_cpus()?
        } else {
            1
        };
        Ok(value_buffer_len(&self.info, cpus))
    }
}

fn query_info(fd: &MapFd) -> Result<MapInfo> {
    let (ret, info) = map_get_info_by_fd(fd.value()?);
    check("bpf_obj_get_info_by_fd", ret)?;
    Ok(info)
}

fn check(call: &str, status: Status) -> Result<u32> {
    status
        .into_result()
        .with_context(|| format!("{call} failed"))
}

pub fn show_info(target: &MapTarget) -> Result<Value> {
    let map = OpenMap::open(target)?;
    Ok(info_json(&map.info))
}

/// Metadata of every map the kernel reports, ordered by id.
pub fn list_maps() -> Result<Value> {
    let mut maps = Vec::new();
    let mut id = 0;
    loop {
        let (ret, next) = map_get_next_id(id);
        if ret.is_errno(errno::ENOENT) {
            break;
        }
        check("bpf_map_get_next_id", ret)?;
        id = next;

        // Maps can go away between the two calls.
        let fd = match MapFd::from_status("bpf_map_get_fd_by_id", map_get_fd_by_id(id)) {
            Ok(fd) => fd,
            Err(err) => {
                warn!("skipping map id {id}: {err:?}");
                continue;
            }
        };
        maps.push(info_json(&query_info(&fd)?));
    }
    Ok(Value::Array(maps))
}

/// Walks the map key by key and looks every key up.
pub fn dump_map(target: &MapTarget) -> Result<Value> {
    let map = OpenMap::open(target)?;
    let fd = map.fd.value()?;
    let mut value = vec![0u8; map.value_len()?];

    let mut entries = Vec::new();
    for key in MapKeys::new(fd, map.info.key_size) {
        let key = key.map_err(|status| anyhow!("bpf_map_get_next_key failed: {status}"))?;
        let ret = map_lookup_elem(fd, &key, &mut value, 0);
        if ret.is_errno(errno::ENOENT) {
            // Deleted while walking.
            continue;
        }
        check("bpf_map_lookup_elem", ret)?;
        entries.push(entry_json(&key, &value));
    }
    Ok(Value::Array(entries))
}

/// Same output as [`dump_map`], read `chunk` entries per kernel call.
pub fn batch_dump(target: &MapTarget, chunk: u32) -> Result<Value> {
    ensure!(chunk > 0, "chunk must be greater than zero");
    let map = OpenMap::open(target)?;
    let value_len = map.value_len()?;

    let mut entries = Vec::new();
    let iter = BatchIter::new(
        map.fd.value()?,
        map.info.key_size,
        value_len as u32,
        chunk,
    );
    for batch in iter {
        let batch = batch.map_err(|status| anyhow!("bpf_map_lookup_batch failed: {status}"))?;
        entries.extend(batch.iter().map(|(key, value)| entry_json(key, value)));
    }
    Ok(Value::Array(entries))
}

pub fn delete_key(target: &MapTarget, key_hex: &str) -> Result<()> {
    let map = OpenMap::open(target)?;
    let key = parse_hex(key_hex)?;
    ensure!(
        key.len() == map.info.key_size as usize,
        "key is {} bytes, map {} expects {}",
        key.len(),
        map.info.id,
        map.info.key_size
    );
    check("bpf_map_delete_elem", map_delete_elem(map.fd.value()?, &key))?;
    Ok(())
}

pub fn freeze_map(target: &MapTarget) -> Result<()> {
    let map = OpenMap::open(target)?;
    check("bpf_map_freeze", map_freeze(map.fd.value()?))?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct CreateOptions {
    pub pin_path: PathBuf,
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub name: Option<String>,
    pub map_flags: u32,
}

/// Creates a map and pins it, returning its metadata.
pub fn create_map(opts: &CreateOptions) -> Result<Value> {
    ensure!(opts.value_size > 0, "value size must be greater than zero");
    ensure!(opts.max_entries > 0, "max entries must be greater than zero");

    let mut create = MapCreateOpts::new(
        opts.map_type,
        opts.key_size,
        opts.value_size,
        opts.max_entries,
    )
    .with_map_flags(opts.map_flags);
    if let Some(name) = &opts.name {
        create = create.with_name(name.clone());
    }
    let fd = MapFd::from_status("bpf_map_create", map_create(&create))
        .context("failed to create map")?;

    pin_map(&fd, &opts.pin_path)?;
    Ok(info_json(&query_info(&fd)?))
}

fn pin_map(fd: &MapFd, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    check("bpf_obj_pin", obj_pin(fd.value()?, path))
        .with_context(|| format!("failed to pin map at {}", path.display()))?;
    Ok(())
}

pub fn info_json(info: &MapInfo) -> Value {
    let mut obj = JsonMap::new();
    obj.insert("id".to_string(), info.id.into());
    obj.insert("type".to_string(), map_type_name(info.map_type).into());
    obj.insert("key_size".to_string(), info.key_size.into());
    obj.insert("value_size".to_string(), info.value_size.into());
    obj.insert("max_entries".to_string(), info.max_entries.into());
    obj.insert("flags".to_string(), format!("{:#x}", info.map_flags).into());
    if let Some(name) = &info.name {
        obj.insert("name".to_string(), Value::String(name.clone()));
    }
    if let Some(ifindex) = info.ifindex.filter(|i| *i != 0) {
        obj.insert("ifindex".to_string(), ifindex.into());
    }
    if let Some(btf_id) = info.btf_id.filter(|i| *i != 0) {
        obj.insert("btf_id".to_string(), btf_id.into());
    }
    if let Some(extra) = info.map_extra.filter(|e| *e != 0) {
        obj.insert("map_extra".to_string(), Value::Number(JsonNumber::from(extra)));
    }
    Value::Object(obj)
}

fn entry_json(key: &[u8], value: &[u8]) -> Value {
    let mut obj = JsonMap::new();
    obj.insert("key".to_string(), Value::String(to_hex(key)));
    obj.insert("value".to_string(), Value::String(to_hex(value)));
    Value::Object(obj)
}

fn map_type_name(map_type: u32) -> String {
    let name = match map_type {
        map_type::BPF_MAP_TYPE_HASH => "hash",
        map_type::BPF_MAP_TYPE_ARRAY => "array",
        map_type::BPF_MAP_TYPE_PROG_ARRAY => "prog_array",
        map_type::BPF_MAP_TYPE_PERF_EVENT_ARRAY => "perf_event_array",
        map_type::BPF_MAP_TYPE_PERCPU_HASH => "percpu_hash",
        map_type::BPF_MAP_TYPE_PERCPU_ARRAY => "percpu_array",
        map_type::BPF_MAP_TYPE_LRU_HASH => "lru_hash",
        map_type::BPF_MAP_TYPE_LRU_PERCPU_HASH => "lru_percpu_hash",
        map_type::BPF_MAP_TYPE_LPM_TRIE => "lpm_trie",
        map_type::BPF_MAP_TYPE_HASH_OF_MAPS => "hash_of_maps",
        map_type::BPF_MAP_TYPE_ARRAY_OF_MAPS => "array_of_maps",
        map_type::BPF_MAP_TYPE_QUEUE => "queue",
        map_type::BPF_MAP_TYPE_STACK => "stack",
        map_type::BPF_MAP_TYPE_RINGBUF => "ringbuf",
        map_type::BPF_MAP_TYPE_BLOOM_FILTER => "bloom_filter",
        other => return other.to_string(),
    };
    name.to_string()
}

fn is_per_cpu(map_type: u32) -> bool {
    matches!(
        map_type,
        map_type::BPF_MAP_TYPE_PERCPU_HASH
            | map_type::BPF_MAP_TYPE_PERCPU_ARRAY
            | map_type::BPF_MAP_TYPE_LRU_PERCPU_HASH
            | map_type::BPF_MAP_TYPE_PERCPU_CGROUP_STORAGE
    )
}

/// Per-CPU maps return one 8-byte aligned slot per possible CPU.
fn value_buffer_len(info: &MapInfo, cpus: usize) -> usize {
    if is_per_cpu(info.map_type) {
        (info.value_size as usize).next_multiple_of(8) * cpus
    } else {
        info.value_size as usize
    }
}

fn possible_cpus() -> Result<usize> {
    let ranges = fs::read_to_string(CPU_POSSIBLE)
        .with_context(|| format!("failed to read {CPU_POSSIBLE}"))?;
    count_cpu_ranges(&ranges)
}

/// Counts the CPUs in a kernel cpu list such as `0-3,8`.
fn count_cpu_ranges(list: &str) -> Result<usize> {
    let mut count = 0;
    for range in list.trim().split(',').filter(|r| !r.is_empty()) {
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (start, end),
            None => (range, range),
        };
        let start: usize = start
            .parse()
            .with_context(|| format!("invalid cpu range {range:?}"))?;
        let end: usize = end
            .parse()
            .with_context(|| format!("invalid cpu range {range:?}"))?;
        ensure!(start <= end, "invalid cpu range {range:?}");
        count += end - start + 1;
    }
    ensure!(count > 0, "empty cpu list");
    Ok(count)
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parses a key given as hex, with optional `0x` prefix and whitespace
/// between bytes.
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    ensure!(!digits.is_empty(), "empty hex string");
    ensure!(
        digits.chars().all(|c| c.is_ascii_hexdigit()),
        "invalid hex string {input:?}"
    );
    ensure!(
        digits.len() % 2 == 0,
        "hex string {input:?} has an odd number of digits"
    );
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}
