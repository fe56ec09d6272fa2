//! Reads per-container CPU and memory accounting directly from the cgroup
//! filesystem. Bollard (and the Docker API generally) has no endpoint for
//! this, so it is a parallel concern to [`super::Engine`] rather than a
//! method on it.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{CgroupCpuStats, CgroupMemStats};
use crate::error::EngineError;

/// Where the cgroup v1 controllers are mounted and the subsystem directory
/// the container's accounting group lives under (`docker` for the default
/// cgroup driver, `system.slice` for systemd-managed hosts).
pub struct CgroupRoot {
    pub cpuacct_root: PathBuf,
    pub memory_root: PathBuf,
}

impl Default for CgroupRoot {
    fn default() -> Self {
        Self {
            cpuacct_root: PathBuf::from("/sys/fs/cgroup/cpuacct/docker"),
            memory_root: PathBuf::from("/sys/fs/cgroup/memory/docker"),
        }
    }
}

pub fn read_cpu(root: &CgroupRoot, container_id: &str) -> Result<CgroupCpuStats, EngineError> {
    let path = root.cpuacct_root.join(container_id).join("cpuacct.stat");
    parse_cpuacct_stat(&path).map_err(|source| EngineError::Cgroup {
        id: container_id.to_owned(),
        source,
    })
}

pub fn read_memory(root: &CgroupRoot, container_id: &str) -> Result<CgroupMemStats, EngineError> {
    let path = root.memory_root.join(container_id).join("memory.stat");
    let limit_path = root
        .memory_root
        .join(container_id)
        .join("memory.limit_in_bytes");
    parse_memory_stat(&path, &limit_path).map_err(|source| EngineError::Cgroup {
        id: container_id.to_owned(),
        source,
    })
}

fn parse_cpuacct_stat(path: &Path) -> anyhow::Result<CgroupCpuStats> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut stats = CgroupCpuStats::default();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match key {
            "user" => stats.user = value,
            "system" => stats.system = value,
            _ => {}
        }
    }
    Ok(stats)
}

fn parse_memory_stat(path: &Path, limit_path: &Path) -> anyhow::Result<CgroupMemStats> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut cache = 0u64;
    let mut rss = 0u64;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match key {
            "cache" => cache = value,
            "rss" => rss = value,
            _ => {}
        }
    }

    let hierarchical_memory_limit = std::fs::read_to_string(limit_path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(u64::MAX);

    Ok(CgroupMemStats {
        cache,
        rss,
        hierarchical_memory_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpuacct_stat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpuacct.stat"), "user 100\nsystem 50\n").unwrap();
        let stats = parse_cpuacct_stat(&dir.path().join("cpuacct.stat")).unwrap();
        assert_eq!(stats, CgroupCpuStats { user: 100, system: 50 });
    }

    #[test]
    fn parses_memory_stat_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("memory.stat"),
            "cache 1024\nrss 2048\nmapped_file 0\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("memory.limit_in_bytes"), "18446744073709551615\n").unwrap();
        let stats = parse_memory_stat(
            &dir.path().join("memory.stat"),
            &dir.path().join("memory.limit_in_bytes"),
        )
        .unwrap();
        assert_eq!(stats.cache, 1024);
        assert_eq!(stats.rss, 2048);
        assert_eq!(stats.hierarchical_memory_limit, u64::MAX);
    }

    #[test]
    fn missing_limit_file_defaults_to_max() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memory.stat"), "cache 1\nrss 2\n").unwrap();
        let stats = parse_memory_stat(
            &dir.path().join("memory.stat"),
            &dir.path().join("memory.limit_in_bytes"),
        )
        .unwrap();
        assert_eq!(stats.hierarchical_memory_limit, u64::MAX);
    }
}
