use crate::state::{HostInfo, SystemSnapshot};
use chrono::{TimeZone, Utc};
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use sysinfo::{
    CpuExt, DiskExt, NetworkExt, NetworksExt, Pid, ProcessExt, System, SystemExt,
};
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("sampling did not finish within {0:?}")]
    Timeout(Duration),
    #[error("sampler is still busy with a previous call")]
    Busy,
    #[error("process statistics unavailable: {0}")]
    Process(String),
    #[error("sampling worker failed: {0}")]
    Worker(String),
}

/// Reads OS counters on demand. Implementations may block; callers bound them.
pub trait SystemSampler: Send + 'static {
    fn sample(&mut self) -> Result<SystemSnapshot, SamplingError>;

    /// Static host identity. Samplers without one report only the build architecture.
    fn host_info(&mut self) -> HostInfo {
        HostInfo {
            architecture: std::env::consts::ARCH.to_string(),
            ..HostInfo::default()
        }
    }
}

/// Runs a [`SystemSampler`] on the blocking pool with an upper bound on wall time.
///
/// A call that overruns keeps the sampler locked until the OS returns; calls made
/// meanwhile fail fast with [`SamplingError::Busy`] instead of piling up.
#[derive(Clone)]
pub struct BoundedSampler {
    inner: Arc<Mutex<Box<dyn SystemSampler>>>,
    timeout: Duration,
}

impl BoundedSampler {
    pub fn new(sampler: Box<dyn SystemSampler>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sampler)),
            timeout,
        }
    }

    pub async fn sample(&self) -> Result<SystemSnapshot, SamplingError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = match inner.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(SamplingError::Busy),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            guard.sample()
        });

        match time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map(SystemSnapshot::normalized),
            Ok(Err(err)) => Err(SamplingError::Worker(err.to_string())),
            Err(_elapsed) => Err(SamplingError::Timeout(self.timeout)),
        }
    }
}

pub struct SysinfoSampler {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                warn!(error = %err, "current pid unavailable, process stats disabled");
                None
            }
        };
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one.
        system.refresh_cpu();
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self { system, pid }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&mut self) -> Result<SystemSnapshot, SamplingError> {
        let system = &mut self.system;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks_list();
        system.refresh_networks();

        let pid = self
            .pid
            .ok_or_else(|| SamplingError::Process("current pid unknown".to_string()))?;
        if !system.refresh_process(pid) {
            return Err(SamplingError::Process(format!("pid {pid} not found")));
        }
        let process = system
            .process(pid)
            .ok_or_else(|| SamplingError::Process(format!("pid {pid} not found")))?;

        let cpu_cores = system.cpus().len() as u32;
        let cpu_percent = system.global_cpu_info().cpu_usage() as f64;
        let cpu_freq_mhz = cpu_frequency_mhz(system);

        let (disk_used_bytes, disk_total_bytes) = disk_usage(system);

        let net = system
            .networks()
            .iter()
            .fold(NetTotals::default(), |acc, (_iface, data)| NetTotals {
                bytes_sent: acc.bytes_sent.saturating_add(data.total_transmitted()),
                bytes_recv: acc.bytes_recv.saturating_add(data.total_received()),
                packets_sent: acc
                    .packets_sent
                    .saturating_add(data.total_packets_transmitted()),
                packets_recv: acc
                    .packets_recv
                    .saturating_add(data.total_packets_received()),
            });

        // sysinfo reports per-core percent; 400% on four cores is a fully busy process.
        let process_cpu_percent = process.cpu_usage() as f64 / cpu_cores.max(1) as f64;
        let process_thread_count = read_thread_count();

        let snapshot = SystemSnapshot {
            cpu_percent,
            cpu_cores,
            cpu_freq_mhz,
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            memory_available_bytes: system.available_memory(),
            swap_used_bytes: system.used_swap(),
            swap_total_bytes: system.total_swap(),
            disk_used_bytes,
            disk_total_bytes,
            net_bytes_sent: net.bytes_sent,
            net_bytes_recv: net.bytes_recv,
            net_packets_sent: net.packets_sent,
            net_packets_recv: net.packets_recv,
            process_memory_bytes: process.memory(),
            process_cpu_percent,
            process_thread_count,
            host_uptime_seconds: system.uptime(),
            captured_at: Utc::now(),
        };
        debug!(
            cpu_percent = snapshot.cpu_percent,
            memory_used_bytes = snapshot.memory_used_bytes,
            "system sampled"
        );
        Ok(snapshot.normalized())
    }

    fn host_info(&mut self) -> HostInfo {
        let system = &self.system;
        let brand = system.global_cpu_info().brand().trim().to_string();
        let boot_time = i64::try_from(system.boot_time())
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        HostInfo {
            host_name: system.host_name(),
            os_name: system.name(),
            os_version: system.long_os_version().or_else(|| system.os_version()),
            kernel_version: system.kernel_version(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_brand: (!brand.is_empty()).then_some(brand),
            cpu_logical_cores: system.cpus().len() as u32,
            cpu_physical_cores: system.physical_core_count().map(|n| n as u32),
            cpu_max_freq_mhz: read_max_cpu_freq_mhz(),
            boot_time,
        }
    }
}

#[derive(Default)]
struct NetTotals {
    bytes_sent: u64,
    bytes_recv: u64,
    packets_sent: u64,
    packets_recv: u64,
}

fn cpu_frequency_mhz(system: &System) -> f64 {
    let global = system.global_cpu_info().frequency();
    if global > 0 {
        return global as f64;
    }
    let cpus = system.cpus();
    if cpus.is_empty() {
        return 0.0;
    }
    let sum: u64 = cpus.iter().map(|c| c.frequency()).sum();
    sum as f64 / cpus.len() as f64
}

/// Root filesystem usage; the sum of all disks when no root mount is listed.
fn disk_usage(system: &System) -> (u64, u64) {
    let root = system
        .disks()
        .iter()
        .find(|d| is_root_mount(d.mount_point()));
    if let Some(d) = root {
        let total = d.total_space();
        return (total.saturating_sub(d.available_space()), total);
    }

    system.disks().iter().fold((0_u64, 0_u64), |(used, total), d| {
        let disk_total = d.total_space();
        (
            used.saturating_add(disk_total.saturating_sub(d.available_space())),
            total.saturating_add(disk_total),
        )
    })
}

fn is_root_mount(mount: &Path) -> bool {
    if mount == Path::new("/") {
        return true;
    }
    let text = mount.to_string_lossy();
    text.eq_ignore_ascii_case("C:\\") || text.eq_ignore_ascii_case("C:/")
}

#[cfg(target_os = "linux")]
fn read_thread_count() -> u32 {
    match fs::read_to_string("/proc/self/status") {
        Ok(text) => parse_status_threads(&text).unwrap_or(0),
        Err(err) => {
            debug!(error = %err, "cannot read /proc/self/status");
            0
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn read_thread_count() -> u32 {
    0
}

#[cfg(target_os = "linux")]
fn read_max_cpu_freq_mhz() -> Option<f64> {
    match fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq") {
        Ok(text) => parse_khz_as_mhz(&text),
        Err(err) => {
            debug!(error = %err, "cpu max frequency unavailable");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn read_max_cpu_freq_mhz() -> Option<f64> {
    None
}

fn parse_khz_as_mhz(text: &str) -> Option<f64> {
    let khz: u64 = text.trim().parse().ok()?;
    (khz > 0).then(|| khz as f64 / 1000.0)
}

fn parse_status_threads(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures;
    use std::thread;

    struct FixedSampler(SystemSnapshot);

    impl SystemSampler for FixedSampler {
        fn sample(&mut self) -> Result<SystemSnapshot, SamplingError> {
            Ok(self.0.clone())
        }
    }

    struct StallingSampler(Duration);

    impl SystemSampler for StallingSampler {
        fn sample(&mut self) -> Result<SystemSnapshot, SamplingError> {
            thread::sleep(self.0);
            Ok(fixtures::system(0, 1.0))
        }
    }

    #[test]
    fn parses_thread_count_from_proc_status() {
        let text = "Name:\tstatusd\nState:\tS (sleeping)\nThreads:\t17\nSigQ:\t0/63\n";
        assert_eq!(parse_status_threads(text), Some(17));
        assert_eq!(parse_status_threads("Name:\tx\n"), None);
    }

    #[test]
    fn parses_cpufreq_khz() {
        assert_eq!(parse_khz_as_mhz("4200000\n"), Some(4200.0));
        assert_eq!(parse_khz_as_mhz("0"), None);
        assert_eq!(parse_khz_as_mhz("n/a"), None);
    }

    #[test]
    fn root_mount_detection() {
        assert!(is_root_mount(Path::new("/")));
        assert!(is_root_mount(Path::new("C:\\")));
        assert!(!is_root_mount(Path::new("/boot")));
    }

    #[tokio::test]
    async fn bounded_sampler_normalizes_output() {
        let sampler = BoundedSampler::new(
            Box::new(FixedSampler(fixtures::system(0, 250.0))),
            Duration::from_secs(1),
        );
        let snapshot = sampler.sample().await.unwrap();
        assert_eq!(snapshot.cpu_percent, 100.0);
    }

    #[tokio::test]
    async fn stalled_sample_times_out_and_next_call_reports_busy() {
        let sampler = BoundedSampler::new(
            Box::new(StallingSampler(Duration::from_millis(500))),
            Duration::from_millis(50),
        );

        let err = sampler.sample().await.unwrap_err();
        assert!(matches!(err, SamplingError::Timeout(_)), "got {err:?}");

        let err = sampler.sample().await.unwrap_err();
        assert!(matches!(err, SamplingError::Busy), "got {err:?}");
    }

    #[test]
    fn sysinfo_sampler_reads_host() {
        let mut sampler = SysinfoSampler::new();
        thread::sleep(sysinfo::System::MINIMUM_CPU_UPDATE_INTERVAL);
        let snapshot = sampler.sample().expect("sample host");
        assert!((0.0..=100.0).contains(&snapshot.cpu_percent));
        assert!((0.0..=100.0).contains(&snapshot.process_cpu_percent));
        assert!(snapshot.cpu_cores >= 1);
        assert!(snapshot.memory_total_bytes > 0);
        assert!(snapshot.process_memory_bytes > 0);

        let host = sampler.host_info();
        assert_eq!(host.architecture, std::env::consts::ARCH);
        assert_eq!(host.cpu_logical_cores, snapshot.cpu_cores);
    }

    #[test]
    fn default_host_info_names_only_the_architecture() {
        let host = FixedSampler(fixtures::system(0, 1.0)).host_info();
        assert_eq!(host.architecture, std::env::consts::ARCH);
        assert_eq!(host.host_name, None);
        assert_eq!(host.boot_time, None);
    }
}
