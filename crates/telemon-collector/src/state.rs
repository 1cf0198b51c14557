use std::sync::{Arc, Mutex, MutexGuard};

/// Statistics of the agent's own process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessStats {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub cpu_usage: f32,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub total_disk_read_bytes: u64,
    pub total_disk_written_bytes: u64,
    pub run_time_secs: u64,
}

/// Everything the agent knows between two reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    pub process: ProcessStats,
    pub random_value: f64,
    /// Number of runtime samples taken since start; never reset.
    pub poll_count: i64,
    pub total_memory: u64,
    pub free_memory: u64,
    /// Utilization per logical core, in core order.
    pub cpu_utilization: Vec<f32>,
}

pub type SharedAgentState = Arc<Mutex<AgentState>>;

pub fn new_shared_state() -> SharedAgentState {
    Arc::new(Mutex::new(AgentState::default()))
}

/// Lock the agent state, recovering from a poisoned Mutex if necessary.
pub fn lock_state(state: &SharedAgentState) -> MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A consistent copy of the state taken under the lock.
pub fn snapshot(state: &SharedAgentState) -> AgentState {
    lock_state(state).clone()
}

/// A named process gauge and how to read it.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGauge {
    pub name: &'static str,
    pub read: fn(&ProcessStats) -> f64,
}

/// The process gauges reported every tick.
pub const PROCESS_GAUGES: &[ProcessGauge] = &[
    ProcessGauge {
        name: "ResidentMemory",
        read: |p| p.resident_memory as f64,
    },
    ProcessGauge {
        name: "VirtualMemory",
        read: |p| p.virtual_memory as f64,
    },
    ProcessGauge {
        name: "ProcessCPU",
        read: |p| f64::from(p.cpu_usage),
    },
    ProcessGauge {
        name: "DiskReadBytes",
        read: |p| p.disk_read_bytes as f64,
    },
    ProcessGauge {
        name: "DiskWrittenBytes",
        read: |p| p.disk_written_bytes as f64,
    },
    ProcessGauge {
        name: "TotalDiskReadBytes",
        read: |p| p.total_disk_read_bytes as f64,
    },
    ProcessGauge {
        name: "TotalDiskWrittenBytes",
        read: |p| p.total_disk_written_bytes as f64,
    },
    ProcessGauge {
        name: "RunTime",
        read: |p| p.run_time_secs as f64,
    },
];
