use std::{os::fd::RawFd, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use bpfmap::MapKeys;
use chrono::Utc;
use tokio::{signal, time};

use crate::inspect::{MapTarget, OpenMap};

/// Prints the map's entry count every `interval` until ctrl-c.
pub async fn watch_map(target: &MapTarget, interval: Duration) -> Result<()> {
    ensure!(!interval.is_zero(), "interval must be greater than zero");
    let map = OpenMap::open(target)?;
    let fd = map.fd.value()?;
    let label = map.info.name.clone().unwrap_or_else(|| map.info.id.to_string());

    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let count = count_entries(fd, map.info.key_size)?;
                log_count(&label, count, map.info.max_entries);
            }
            res = signal::ctrl_c() => {
                res.context("failed to wait for ctrl-c")?;
                break;
            }
        }
    }
    Ok(())
}

fn count_entries(fd: RawFd, key_size: u32) -> Result<usize> {
    let mut count = 0;
    for key in MapKeys::new(fd, key_size) {
        key.map_err(|status| anyhow!("bpf_map_get_next_key failed: {status}"))?;
        count += 1;
    }
    Ok(count)
}

fn log_count(label: &str, count: usize, max_entries: u32) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    println!("[{timestamp}] map {label} - {count}/{max_entries} entries");
}
