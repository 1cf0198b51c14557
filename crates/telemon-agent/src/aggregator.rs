use std::collections::BTreeMap;
use telemon_collector::state::{snapshot, AgentState, SharedAgentState};
use telemon_collector::PROCESS_GAUGES;
use telemon_common::types::MetricRecord;

/// The metrics reported in one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, i64>,
}

impl MetricSet {
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the set into individual records, gauges first.
    pub fn records(&self) -> Vec<MetricRecord> {
        let gauges = self
            .gauges
            .iter()
            .map(|(name, value)| MetricRecord::gauge(name.clone(), *value));
        let counters = self
            .counters
            .iter()
            .map(|(name, delta)| MetricRecord::counter(name.clone(), *delta));
        gauges.chain(counters).collect()
    }
}

/// Builds the report for `state`, or `None` before the first runtime sample.
pub fn aggregate(state: &AgentState) -> Option<MetricSet> {
    if state.poll_count == 0 {
        return None;
    }

    let mut set = MetricSet::default();
    for gauge in PROCESS_GAUGES {
        set.gauges
            .insert(gauge.name.to_string(), (gauge.read)(&state.process));
    }
    set.gauges
        .insert("RandomValue".to_string(), state.random_value);
    set.gauges
        .insert("TotalMemory".to_string(), state.total_memory as f64);
    set.gauges
        .insert("FreeMemory".to_string(), state.free_memory as f64);
    for (i, usage) in state.cpu_utilization.iter().enumerate() {
        set.gauges
            .insert(format!("CPUutilization{}", i + 1), f64::from(*usage));
    }

    set.counters
        .insert("PollCount".to_string(), state.poll_count);
    Some(set)
}

/// Aggregates a consistent copy of the shared state.
pub fn collect_report(state: &SharedAgentState) -> Option<MetricSet> {
    aggregate(&snapshot(state))
}
