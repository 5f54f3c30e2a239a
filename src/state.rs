use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of host and process resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub cpu_cores: u32,
    pub cpu_freq_mhz: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
    pub net_packets_sent: u64,
    pub net_packets_recv: u64,
    pub process_memory_bytes: u64,
    pub process_cpu_percent: f64,
    pub process_thread_count: u32,
    pub host_uptime_seconds: u64,
    pub captured_at: DateTime<Utc>,
}

impl SystemSnapshot {
    /// Clamps percentages into `0..=100`; NaN becomes 0.
    pub fn normalized(mut self) -> Self {
        self.cpu_percent = clamp_percent(self.cpu_percent);
        self.process_cpu_percent = clamp_percent(self.process_cpu_percent);
        if !self.cpu_freq_mhz.is_finite() || self.cpu_freq_mhz < 0.0 {
            self.cpu_freq_mhz = 0.0;
        }
        self
    }

    pub fn memory_percent(&self) -> f64 {
        ratio_percent(self.memory_used_bytes, self.memory_total_bytes)
    }

    pub fn disk_percent(&self) -> f64 {
        ratio_percent(self.disk_used_bytes, self.disk_total_bytes)
    }

    /// Same readings, stamped with a new capture time.
    pub fn restamped(&self, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            ..self.clone()
        }
    }
}

/// Counters reported by the host application, before the core timestamps them.
///
/// An application that is attached but not ready yet reports `connected: false` with
/// `starting: true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub connected: bool,
    #[serde(default)]
    pub starting: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub guild_count: u64,
    #[serde(default)]
    pub user_count: u64,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub shard_count: u32,
    #[serde(default)]
    pub command_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    Online,
    Starting,
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub connected: bool,
    pub status: ApplicationState,
    pub name: Option<String>,
    pub id: Option<u64>,
    pub guild_count: u64,
    pub user_count: u64,
    pub uptime_seconds: u64,
    pub latency_ms: f64,
    pub shard_count: u32,
    pub command_count: u32,
    pub captured_at: DateTime<Utc>,
}

impl ApplicationSnapshot {
    pub fn from_status(status: ApplicationStatus, captured_at: DateTime<Utc>) -> Self {
        let latency_ms = if status.latency_ms.is_finite() && status.latency_ms > 0.0 {
            status.latency_ms
        } else {
            0.0
        };
        let state = match (status.connected, status.starting) {
            (true, _) => ApplicationState::Online,
            (false, true) => ApplicationState::Starting,
            (false, false) => ApplicationState::NotConnected,
        };
        Self {
            connected: status.connected,
            status: state,
            name: status.name,
            id: status.id,
            guild_count: status.guild_count,
            user_count: status.user_count,
            uptime_seconds: status.uptime_seconds,
            latency_ms,
            shard_count: status.shard_count,
            command_count: status.command_count,
            captured_at,
        }
    }

    /// Published when the application cannot be reached.
    pub fn disconnected(captured_at: DateTime<Utc>) -> Self {
        Self::from_status(ApplicationStatus::default(), captured_at)
    }
}

/// Host identity. Read once at startup; none of it changes while the process runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: String,
    pub cpu_brand: Option<String>,
    pub cpu_logical_cores: u32,
    pub cpu_physical_cores: Option<u32>,
    pub cpu_max_freq_mhz: Option<f64>,
    pub boot_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl From<&SystemSnapshot> for HistoryPoint {
    fn from(value: &SystemSnapshot) -> Self {
        Self {
            timestamp: value.captured_at,
            cpu_percent: clamp_percent(value.cpu_percent),
            memory_percent: value.memory_percent(),
        }
    }
}

/// Everything one tick produced. Replaced as a whole, never edited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedState {
    pub system: SystemSnapshot,
    pub application: ApplicationSnapshot,
    pub history: Vec<HistoryPoint>,
}

impl PublishedState {
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.system.captured_at
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

fn ratio_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent((used as f64 / total as f64) * 100.0)
}
