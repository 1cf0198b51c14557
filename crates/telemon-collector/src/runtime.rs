use crate::state::{lock_state, ProcessStats, SharedAgentState};
use crate::Sampler;
use anyhow::{anyhow, Result};
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Samples the agent's own process, draws a fresh random value and bumps the
/// poll count.
pub struct RuntimeSampler {
    system: System,
    pid: Pid,
}

impl RuntimeSampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("cannot resolve own pid: {e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }

    fn read_process(&mut self) -> Result<ProcessStats> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not visible", self.pid))?;
        let disk = process.disk_usage();
        Ok(ProcessStats {
            resident_memory: process.memory(),
            virtual_memory: process.virtual_memory(),
            cpu_usage: process.cpu_usage(),
            disk_read_bytes: disk.read_bytes,
            disk_written_bytes: disk.written_bytes,
            total_disk_read_bytes: disk.total_read_bytes,
            total_disk_written_bytes: disk.total_written_bytes,
            run_time_secs: process.run_time(),
        })
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "runtime"
    }

    fn sample(&mut self, state: &SharedAgentState) -> Result<()> {
        let process = self.read_process()?;
        let random_value: f64 = rand::thread_rng().gen();

        let mut state = lock_state(state);
        state.process = process;
        state.random_value = random_value;
        state.poll_count += 1;
        tracing::trace!(
            poll_count = state.poll_count,
            resident_memory = state.process.resident_memory,
            "Runtime sample taken"
        );
        Ok(())
    }
}
