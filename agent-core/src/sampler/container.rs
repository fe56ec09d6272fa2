//! Per-container CPU and memory sampler, plus the once-a-minute image/layer
//! count gauges (§4.5).

use std::sync::Arc;
use std::time::Duration;

use crate::engine::cgroup::{self, CgroupRoot};
use crate::engine::Engine;
use crate::metrics::{safe_name, Registry};

const PAIR_INTERVAL: Duration = Duration::from_secs(1);
const ENGINE_ERROR_BACKOFF: Duration = Duration::from_secs(10);
const IMAGE_COUNT_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the container CPU+memory sampler forever at `tick` cadence, and a
/// parallel loop recording image/layer counts every 60s.
pub async fn run_forever<E: Engine + 'static>(engine: Arc<E>, registry: Arc<Registry>, tick: Duration) {
    let cgroup_root = CgroupRoot::default();
    tokio::join!(
        sample_loop(engine.clone(), registry.clone(), cgroup_root, tick),
        image_count_loop(engine, registry),
    );
}

async fn sample_loop<E: Engine>(engine: Arc<E>, registry: Arc<Registry>, cgroup_root: CgroupRoot, tick: Duration) {
    loop {
        let containers = match engine.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("container sampler: list_containers failed: {e}");
                tokio::time::sleep(ENGINE_ERROR_BACKOFF).await;
                continue;
            }
        };
        registry.record_gauge("docker.containers", containers.len() as i64);

        let ids: Vec<String> = containers.iter().map(|c| c.id.clone()).collect();
        let names: std::collections::HashMap<String, String> =
            containers.into_iter().map(|c| (c.id, c.name)).collect();

        tokio::join!(
            sample_cpu(&cgroup_root, &ids, &names, &registry),
            sample_memory(&cgroup_root, &ids, &names, &registry),
        );

        tokio::time::sleep(tick).await;
    }
}

fn num_cpus() -> f64 {
    #[cfg(target_os = "linux")]
    {
        procfs::CpuInfo::new().map(|c| c.num_cores().max(1) as f64).unwrap_or(1.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        1.0
    }
}

#[derive(Default, Clone, Copy)]
struct HostCpuTotals {
    user: u64,
    system: u64,
    period_sum: u64,
}

fn read_host_cpu_totals() -> HostCpuTotals {
    #[cfg(target_os = "linux")]
    {
        match procfs::KernelStats::new() {
            Ok(s) => {
                let t = &s.total;
                let iowait = t.iowait.unwrap_or(0);
                let irq = t.irq.unwrap_or(0);
                let softirq = t.softirq.unwrap_or(0);
                let guest = t.guest.unwrap_or(0);
                let guest_nice = t.guest_nice.unwrap_or(0);
                let steal = t.steal.unwrap_or(0);
                let period_sum = t.user + t.system + iowait + irq + softirq + t.idle + t.nice + guest + guest_nice + steal;
                HostCpuTotals {
                    user: t.user,
                    system: t.system,
                    period_sum,
                }
            }
            Err(e) => {
                log::warn!("reading /proc/stat failed: {e}");
                HostCpuTotals::default()
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        HostCpuTotals::default()
    }
}

async fn sample_cpu(
    cgroup_root: &CgroupRoot,
    ids: &[String],
    names: &std::collections::HashMap<String, String>,
    registry: &Arc<Registry>,
) {
    let host_before = read_host_cpu_totals();
    let container_before: Vec<_> = ids
        .iter()
        .map(|id| (id.clone(), cgroup::read_cpu(cgroup_root, id)))
        .collect();

    tokio::time::sleep(PAIR_INTERVAL).await;

    let host_after = read_host_cpu_totals();
    let num_cpus = num_cpus();
    let period = (host_after.period_sum.saturating_sub(host_before.period_sum)) as f64 / num_cpus;

    for (id, before) in container_before {
        let Ok(before) = before else { continue };
        let Ok(after) = cgroup::read_cpu(cgroup_root, &id) else {
            continue;
        };
        let d_user = after.user.saturating_sub(before.user) as f64;
        let d_system = after.system.saturating_sub(before.system) as f64;

        let (user_perc, sys_perc) = if d_user + d_system > 0.0 && period > 0.0 {
            (
                (d_user / period) * num_cpus * 100.0,
                (d_system / period) * num_cpus * 100.0,
            )
        } else {
            (0.0, 0.0)
        };
        let total_perc = if period > 0.0 {
            ((d_user + d_system) / period) * num_cpus * 100.0
        } else {
            0.0
        };

        let name = names.get(&id).map(|n| safe_name(n)).unwrap_or_else(|| id.clone());
        registry.record_gauge_float(&format!("docker.cpu.user.{name}"), user_perc);
        registry.record_gauge_float(&format!("docker.cpu.system.{name}"), sys_perc);
        registry.record_gauge_float(&format!("docker.cpu.total.{name}"), total_perc);
    }

    let _ = host_before.user;
    let _ = host_before.system;
}

async fn sample_memory(
    cgroup_root: &CgroupRoot,
    ids: &[String],
    names: &std::collections::HashMap<String, String>,
    registry: &Arc<Registry>,
) {
    for id in ids {
        let Ok(mem) = cgroup::read_memory(cgroup_root, id) else {
            continue;
        };
        let name = names.get(id).map(|n| safe_name(n)).unwrap_or_else(|| id.clone());
        let total = mem.cache + mem.rss;
        registry.record_gauge(&format!("docker.mem.total.{name}"), total as i64);
        registry.record_gauge(&format!("docker.mem.cache.{name}"), mem.cache as i64);
        registry.record_gauge(&format!("docker.mem.rss.{name}"), mem.rss as i64);
        // When there is no effective hierarchical limit the host's total
        // memory stands in, per §4.5 — no limit metric is published either way.
    }
}

async fn image_count_loop<E: Engine>(engine: Arc<E>, registry: Arc<Registry>) {
    loop {
        match engine.list_images().await {
            Ok(counts) => {
                registry.record_gauge("docker.images", counts.images as i64);
                registry.record_gauge("docker.layers", counts.layers as i64);
            }
            Err(e) => log::warn!("listing images failed: {e}"),
        }
        tokio::time::sleep(IMAGE_COUNT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_percentages_match_concrete_scenario() {
        // host Δuser=100, Δsystem=50, all else zero; container Δuser=50,
        // Δsystem=25; numCpus=1 — per §8 scenario 4.
        let num_cpus = 1.0f64;
        let period = 150.0 / num_cpus;
        let d_user = 50.0;
        let d_system = 25.0;
        let user_perc = (d_user / period) * num_cpus * 100.0;
        let sys_perc = (d_system / period) * num_cpus * 100.0;
        let total_perc = ((d_user + d_system) / period) * num_cpus * 100.0;
        assert!((user_perc - 33.33).abs() < 0.01);
        assert!((sys_perc - 16.67).abs() < 0.01);
        assert!((total_perc - 50.00).abs() < 0.01);
    }
}
