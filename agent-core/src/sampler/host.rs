//! Host-wide samplers: load, per-CPU utilisation, memory, network and disk.
//! Five independent passes run concurrently each tick; a barrier waits for
//! all five before the loop repeats (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Registry;

const PAIR_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_forever(registry: Arc<Registry>) {
    loop {
        tokio::join!(
            sample_load(&registry),
            sample_cpu(&registry),
            sample_memory(&registry),
            sample_net(&registry),
            sample_disk(&registry),
        );
    }
}

async fn sample_load(registry: &Arc<Registry>) {
    match procfs::LoadAverage::new() {
        Ok(load) => {
            registry.record_gauge_float("system.load.load1", load.one as f64);
            registry.record_gauge_float("system.load.load5", load.five as f64);
            registry.record_gauge_float("system.load.load15", load.fifteen as f64);
        }
        Err(e) => log::warn!("reading load average failed: {e}"),
    }
}

#[derive(Default, Clone, Copy)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
    guest: u64,
    guest_nice: u64,
}

impl CpuTimes {
    fn from_proc(t: &procfs::CpuTime) -> Self {
        Self {
            user: t.user,
            nice: t.nice,
            system: t.system,
            idle: t.idle,
            iowait: t.iowait.unwrap_or(0),
            irq: t.irq.unwrap_or(0),
            softirq: t.softirq.unwrap_or(0),
            steal: t.steal.unwrap_or(0),
            guest: t.guest.unwrap_or(0),
            guest_nice: t.guest_nice.unwrap_or(0),
        }
    }

    fn delta(&self, prev: &CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(prev.user),
            nice: self.nice.saturating_sub(prev.nice),
            system: self.system.saturating_sub(prev.system),
            idle: self.idle.saturating_sub(prev.idle),
            iowait: self.iowait.saturating_sub(prev.iowait),
            irq: self.irq.saturating_sub(prev.irq),
            softirq: self.softirq.saturating_sub(prev.softirq),
            steal: self.steal.saturating_sub(prev.steal),
            guest: self.guest.saturating_sub(prev.guest),
            guest_nice: self.guest_nice.saturating_sub(prev.guest_nice),
        }
    }
}

async fn sample_cpu(registry: &Arc<Registry>) {
    let before = match procfs::KernelStats::new() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("reading /proc/stat failed: {e}");
            return;
        }
    };
    tokio::time::sleep(PAIR_INTERVAL).await;
    let after = match procfs::KernelStats::new() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("reading /proc/stat failed: {e}");
            return;
        }
    };

    let num_cpus = before.cpu_time.len().max(1) as f64;
    record_cpu_label(registry, "all", &CpuTimes::from_proc(&before.total), &CpuTimes::from_proc(&after.total), num_cpus);
    for (i, (b, a)) in before.cpu_time.iter().zip(after.cpu_time.iter()).enumerate() {
        let label = format!("cpu{i}");
        record_cpu_label(registry, &label, &CpuTimes::from_proc(b), &CpuTimes::from_proc(a), num_cpus);
    }
}

fn record_cpu_label(registry: &Arc<Registry>, label: &str, before: &CpuTimes, after: &CpuTimes, num_cpus: f64) {
    let d = after.delta(before);
    let period: f64 = (d.user + d.system + d.iowait + d.irq + d.softirq + d.idle + d.nice + d.guest + d.guest_nice + d.steal) as f64
        / num_cpus;

    let user_all = d.user.saturating_sub(d.guest) as f64;
    let nice_all = d.nice.saturating_sub(d.guest_nice) as f64;
    let system_all = (d.system + d.irq + d.softirq) as f64;
    let idle_all = (d.idle + d.iowait) as f64;
    let busy = period - idle_all.min(period);

    let pct = |v: f64| if period > 0.0 { (v / period) * 100.0 } else { 0.0 };

    registry.record_gauge_float(&format!("system.cpu.util.total.{label}"), pct(busy));
    registry.record_gauge_float(&format!("system.cpu.util.user.{label}"), pct(user_all));
    registry.record_gauge_float(&format!("system.cpu.util.system.{label}"), pct(system_all));
    registry.record_gauge_float(&format!("system.cpu.util.iowait.{label}"), pct(d.iowait as f64));
    registry.record_gauge_float(&format!("system.cpu.util.idle.{label}"), pct(idle_all));
    registry.record_gauge_float(&format!("system.cpu.util.nice.{label}"), pct(nice_all));
    registry.record_gauge_float(&format!("system.cpu.util.irq.{label}"), pct(d.irq as f64));
    registry.record_gauge_float(&format!("system.cpu.util.softirq.{label}"), pct(d.softirq as f64));
    registry.record_gauge_float(&format!("system.cpu.util.steal.{label}"), pct(d.steal as f64));
}

async fn sample_memory(registry: &Arc<Registry>) {
    let mem = match procfs::Meminfo::new() {
        Ok(m) => m,
        Err(e) => {
            log::warn!("reading /proc/meminfo failed: {e}");
            return;
        }
    };
    registry.record_gauge("system.mem.total", mem.mem_total as i64);
    registry.record_gauge("system.mem.free", mem.mem_free as i64);
    registry.record_gauge("system.mem.buffers", mem.buffers as i64);
    registry.record_gauge("system.mem.cached", mem.cached as i64);
    registry.record_gauge("system.mem.active", mem.active as i64);
    registry.record_gauge("system.mem.inactive", mem.inactive as i64);
    registry.record_gauge(
        "system.mem.available",
        mem.mem_available.unwrap_or(mem.mem_free) as i64,
    );
    registry.record_gauge("system.mem.shared", mem.shmem.unwrap_or(0) as i64);
}

fn sanitize_addr(addr: &str) -> String {
    let without_cidr = addr.split('/').next().unwrap_or(addr);
    without_cidr.replace('.', "_").replace(':', "_")
}

async fn sample_net(registry: &Arc<Registry>) {
    let before = match procfs::net::dev() {
        Ok(d) => d,
        Err(e) => {
            log::warn!("reading /proc/net/dev failed: {e}");
            return;
        }
    };
    let addrs = if_addrs::get_if_addrs().unwrap_or_default();
    tokio::time::sleep(PAIR_INTERVAL).await;
    let after = match procfs::net::dev() {
        Ok(d) => d,
        Err(e) => {
            log::warn!("reading /proc/net/dev failed: {e}");
            return;
        }
    };

    for (name, a) in after.iter() {
        let Some(b) = before.get(name) else { continue };
        let secs = PAIR_INTERVAL.as_secs_f64();
        let bytes_sent = (a.sent_bytes.saturating_sub(b.sent_bytes)) as f64 / secs;
        let bytes_recv = (a.recv_bytes.saturating_sub(b.recv_bytes)) as f64 / secs;
        let packets_sent = (a.sent_packets.saturating_sub(b.sent_packets)) as f64 / secs;
        let packets_recv = (a.recv_packets.saturating_sub(b.recv_packets)) as f64 / secs;
        let errs_in = (a.recv_errs.saturating_sub(b.recv_errs)) as f64 / secs;
        let errs_out = (a.sent_errs.saturating_sub(b.sent_errs)) as f64 / secs;
        let drop_in = (a.recv_drop.saturating_sub(b.recv_drop)) as f64 / secs;
        let drop_out = (a.sent_drop.saturating_sub(b.sent_drop)) as f64 / secs;

        publish_net(registry, &format!("if.{name}"), bytes_sent, bytes_recv, packets_sent, packets_recv, errs_in, errs_out, drop_in, drop_out);

        for addr in addrs.iter().filter(|a| &a.name == name) {
            let key = format!(
                "{}.{}",
                if addr.ip().is_ipv4() { "ip4" } else { "ip6" },
                sanitize_addr(&addr.ip().to_string())
            );
            publish_net(registry, &key, bytes_sent, bytes_recv, packets_sent, packets_recv, errs_in, errs_out, drop_in, drop_out);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn publish_net(
    registry: &Arc<Registry>,
    key: &str,
    bytes_sent: f64,
    bytes_recv: f64,
    packets_sent: f64,
    packets_recv: f64,
    errs_in: f64,
    errs_out: f64,
    drop_in: f64,
    drop_out: f64,
) {
    registry.record_gauge_float(&format!("system.net.bytes.sent.{key}"), bytes_sent);
    registry.record_gauge_float(&format!("system.net.bytes.recv.{key}"), bytes_recv);
    registry.record_gauge_float(&format!("system.net.bytes.total.{key}"), bytes_sent + bytes_recv);
    registry.record_gauge_float(&format!("system.net.packets.sent.{key}"), packets_sent);
    registry.record_gauge_float(&format!("system.net.packets.recv.{key}"), packets_recv);
    registry.record_gauge_float(&format!("system.net.packets.total.{key}"), packets_sent + packets_recv);
    registry.record_gauge_float(&format!("system.net.errors.in.{key}"), errs_in);
    registry.record_gauge_float(&format!("system.net.errors.out.{key}"), errs_out);
    registry.record_gauge_float(&format!("system.net.errors.total.{key}"), errs_in + errs_out);
    // dropped-in uses the recv-side counter, dropped-out the send-side one —
    // the original implementation swapped these.
    registry.record_gauge_float(&format!("system.net.dropped.in.{key}"), drop_in);
    registry.record_gauge_float(&format!("system.net.dropped.out.{key}"), drop_out);
    registry.record_gauge_float(&format!("system.net.dropped.total.{key}"), drop_in + drop_out);
}

async fn sample_disk(registry: &Arc<Registry>) {
    let before = match procfs::diskstats() {
        Ok(d) => d,
        Err(e) => {
            log::warn!("reading /proc/diskstats failed: {e}");
            return;
        }
    };
    let mountpoints = mounted_devices();
    tokio::time::sleep(PAIR_INTERVAL).await;
    let after = match procfs::diskstats() {
        Ok(d) => d,
        Err(e) => {
            log::warn!("reading /proc/diskstats failed: {e}");
            return;
        }
    };

    let before_by_name: HashMap<&str, &procfs::DiskStat> =
        before.iter().map(|d| (d.name.as_str(), d)).collect();

    for a in after.iter() {
        let Some(b) = before_by_name.get(a.name.as_str()) else {
            continue;
        };
        const SECTOR_BYTES: u64 = 512;
        let read_bytes = (a.sectors_read.saturating_sub(b.sectors_read)) * SECTOR_BYTES;
        let write_bytes = (a.sectors_written.saturating_sub(b.sectors_written)) * SECTOR_BYTES;
        let read_iops = a.reads.saturating_sub(b.reads);
        let write_iops = a.writes.saturating_sub(b.writes);

        publish_disk(registry, &format!("dev.{}", a.name), read_bytes, write_bytes, read_iops, write_iops);
        if let Some(mp) = mountpoints.get(&a.name) {
            publish_disk(registry, &format!("mount.{mp}"), read_bytes, write_bytes, read_iops, write_iops);
        }
    }
}

fn publish_disk(registry: &Arc<Registry>, key: &str, read_bytes: u64, write_bytes: u64, read_iops: u64, write_iops: u64) {
    registry.record_counter(&format!("system.disk.bytes.read.{key}"), read_bytes as i64);
    registry.record_counter(&format!("system.disk.bytes.write.{key}"), write_bytes as i64);
    registry.record_counter(&format!("system.disk.bytes.total.{key}"), (read_bytes + write_bytes) as i64);
    registry.record_counter(&format!("system.disk.iops.read.{key}"), read_iops as i64);
    registry.record_counter(&format!("system.disk.iops.write.{key}"), write_iops as i64);
    registry.record_counter(&format!("system.disk.iops.total.{key}"), (read_iops + write_iops) as i64);
}

fn mounted_devices() -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(mounts) = procfs::process::Process::myself().and_then(|p| p.mountinfo()) {
        for m in mounts {
            if let Some(source) = m.mount_source {
                if let Some(dev) = source.strip_prefix("/dev/") {
                    map.insert(dev.to_owned(), m.mount_point.to_string_lossy().into_owned());
                }
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_cidr_and_replaces_dots() {
        assert_eq!(sanitize_addr("192.168.1.5/24"), "192_168_1_5");
        assert_eq!(sanitize_addr("fe80::1/64"), "fe80__1");
    }

    #[test]
    fn cpu_delta_saturates_instead_of_underflowing() {
        let prev = CpuTimes { user: 10, ..Default::default() };
        let now = CpuTimes { user: 5, ..Default::default() };
        assert_eq!(now.delta(&prev).user, 0);
    }
}
