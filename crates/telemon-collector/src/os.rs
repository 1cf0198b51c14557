use crate::state::{lock_state, SharedAgentState};
use crate::Sampler;
use anyhow::Result;
use sysinfo::System;

/// Samples host memory and per-core CPU utilization.
pub struct OsSampler {
    system: System,
}

impl OsSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first reading.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for OsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for OsSampler {
    fn name(&self) -> &str {
        "os"
    }

    fn sample(&mut self, state: &SharedAgentState) -> Result<()> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let total_memory = self.system.total_memory();
        let free_memory = self.system.free_memory();
        let cpu_utilization: Vec<f32> = self.system.cpus().iter().map(|c| c.cpu_usage()).collect();

        tracing::trace!(total_memory, free_memory, cores = cpu_utilization.len(), "OS sample taken");
        let mut state = lock_state(state);
        state.total_memory = total_memory;
        state.free_memory = free_memory;
        state.cpu_utilization = cpu_utilization;
        Ok(())
    }
}
