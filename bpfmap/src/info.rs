use std::{
    mem::{offset_of, size_of, size_of_val},
    os::fd::RawFd,
};

use bpfmap_common::{BpfAttr, MapInfoRecord, cmd};

use crate::{status::Status, sys};

/// Map metadata as reported by the kernel.
///
/// The leading fields are present on every kernel that supports the query.
/// The optional ones are only set when the record the kernel filled in was
/// long enough to contain them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MapInfo {
    pub map_type: u32,
    pub id: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub map_flags: u32,
    pub name: Option<String>,
    pub ifindex: Option<u32>,
    pub netns_dev: Option<u64>,
    pub netns_ino: Option<u64>,
    pub btf_id: Option<u32>,
    pub btf_key_type_id: Option<u32>,
    pub btf_value_type_id: Option<u32>,
    pub map_extra: Option<u64>,
    /// Number of bytes of the record the kernel wrote.
    pub info_len: u32,
}

macro_rules! field_if_fits {
    ($record:ident, $len:expr, $field:ident) => {
        (offset_of!(MapInfoRecord, $field) + size_of_val(&$record.$field) <= $len)
            .then_some($record.$field)
    };
}

impl MapInfo {
    fn from_record(record: &MapInfoRecord, info_len: u32) -> Self {
        let len = info_len as usize;
        Self {
            map_type: record.map_type,
            id: record.id,
            key_size: record.key_size,
            value_size: record.value_size,
            max_entries: record.max_entries,
            map_flags: record.map_flags,
            name: field_if_fits!(record, len, name).map(|name| name_from_bytes(&name)),
            ifindex: field_if_fits!(record, len, ifindex),
            netns_dev: field_if_fits!(record, len, netns_dev),
            netns_ino: field_if_fits!(record, len, netns_ino),
            btf_id: field_if_fits!(record, len, btf_id),
            btf_key_type_id: field_if_fits!(record, len, btf_key_type_id),
            btf_value_type_id: field_if_fits!(record, len, btf_value_type_id),
            map_extra: field_if_fits!(record, len, map_extra),
            info_len,
        }
    }
}

fn name_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Queries the metadata of the map behind `fd`. The returned info is only
/// meaningful when the status is ok.
pub fn map_get_info_by_fd(fd: RawFd) -> (Status, MapInfo) {
    let mut record = MapInfoRecord::default();
    let mut attr = BpfAttr::zeroed();
    let u = unsafe { &mut attr.info };
    u.bpf_fd = fd as u32;
    u.info_len = size_of::<MapInfoRecord>() as u32;
    u.info = &mut record as *mut MapInfoRecord as u64;

    let ret = Status::from_result(sys::bpf(cmd::BPF_OBJ_GET_INFO_BY_FD, &mut attr));
    if !ret.is_ok() {
        return (ret, MapInfo::default());
    }
    let info_len = unsafe { attr.info.info_len };
    (ret, MapInfo::from_record(&record, info_len))
}
