//! The telemon agent: samples its own process and the host, aggregates the
//! readings every reporting tick and pushes them to the collector.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod grpc;
pub mod runner;
pub mod transport;

pub use aggregator::{aggregate, MetricSet};
pub use config::AgentConfig;
pub use dispatcher::{DeliveryReport, Dispatcher, DispatcherConfig};
pub use runner::AgentHandle;
pub use transport::{DeliveryError, Transport};
