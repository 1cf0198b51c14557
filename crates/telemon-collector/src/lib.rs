//! Sampling framework for the telemon agent.
//!
//! Each [`Sampler`] reads one category of telemetry (process statistics in
//! [`runtime`], host memory and CPU in [`os`]) and publishes it into the
//! [`state::SharedAgentState`] the reporter reads from.

pub mod os;
pub mod runtime;
pub mod state;

use anyhow::Result;
use state::SharedAgentState;

pub use os::OsSampler;
pub use runtime::RuntimeSampler;
pub use state::{AgentState, ProcessGauge, ProcessStats, PROCESS_GAUGES};

/// A periodic telemetry source running inside the agent.
///
/// Implementations measure without holding the state lock and take it only to
/// publish the new reading.
pub trait Sampler: Send {
    /// Returns the sampler name (e.g., `"runtime"`, `"os"`), used for logging.
    fn name(&self) -> &str;

    /// Takes one reading and publishes it into `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails; `state` is
    /// left untouched in that case.
    fn sample(&mut self, state: &SharedAgentState) -> Result<()>;
}
