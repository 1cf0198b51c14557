use crate::aggregator::collect_report;
use crate::config::{AgentConfig, TransportKind};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::grpc::GrpcTransport;
use crate::transport::{local_ip_for, Envelope, HttpTransport, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use telemon_collector::state::{new_shared_state, SharedAgentState};
use telemon_collector::{OsSampler, RuntimeSampler, Sampler};
use telemon_common::crypto::PayloadEncryptor;
use telemon_common::sign::Signer;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Builds the transport selected by `config.transport`.
pub fn build_transport(config: &AgentConfig) -> Result<Arc<dyn Transport>> {
    let real_ip = local_ip_for(&config.server_addr);
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => {
            let signer = Signer::from_config(config.signing_key.as_deref());
            let encryptor = config
                .public_key_path
                .as_deref()
                .map(PayloadEncryptor::load)
                .transpose()
                .context("failed to load collector public key")?;
            Arc::new(HttpTransport::new(
                config.http_base_url(),
                config.request_timeout(),
                Envelope::new(signer, encryptor),
                real_ip,
            )?)
        }
        TransportKind::Grpc => Arc::new(GrpcTransport::new(
            &config.grpc_uri(),
            config.request_timeout(),
            real_ip,
        )?),
    };
    Ok(transport)
}

pub fn dispatcher_config(config: &AgentConfig) -> DispatcherConfig {
    DispatcherConfig {
        batch: config.batch,
        path_style: config.path_style,
        workers: config.rate_limit.max(1),
        deadline: config.report_deadline(),
        retry: config.retry.policy(),
    }
}

/// Runs `sampler` every `period` until `cancel` fires.
pub async fn run_sampler(
    mut sampler: Box<dyn Sampler>,
    state: SharedAgentState,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = sampler.sample(&state) {
                    tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    tracing::debug!(sampler = sampler.name(), "Sampler stopped");
}

/// Aggregates and dispatches a report every `period` until `cancel` fires.
pub async fn run_reporter(
    dispatcher: Dispatcher,
    state: SharedAgentState,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some(set) = collect_report(&state) else {
                    tracing::debug!("No samples yet, skipping report");
                    continue;
                };
                let report = dispatcher.dispatch(&set).await;
                tracing::info!(
                    delivered = report.delivered,
                    dropped = report.dropped,
                    batched = report.batched,
                    "Report cycle finished"
                );
            }
            _ = cancel.cancelled() => break,
        }
    }
    tracing::debug!("Reporter stopped");
}

/// The running agent: two samplers and one reporter.
pub struct AgentHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    state: SharedAgentState,
}

impl AgentHandle {
    /// Starts the agent with the transport described by `config`.
    pub fn start(config: &AgentConfig) -> Result<Self> {
        let transport = build_transport(config)?;
        Self::start_with_transport(config, transport)
    }

    pub fn start_with_transport(config: &AgentConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let state = new_shared_state();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let samplers: Vec<Box<dyn Sampler>> = vec![
            Box::new(RuntimeSampler::new()?),
            Box::new(OsSampler::new()),
        ];
        for sampler in samplers {
            tasks.spawn(run_sampler(
                sampler,
                state.clone(),
                config.poll_interval(),
                cancel.clone(),
            ));
        }

        tracing::info!(
            transport = transport.name(),
            batch = config.batch,
            workers = config.rate_limit.max(1),
            "Starting reporter"
        );
        let dispatcher = Dispatcher::new(transport, dispatcher_config(config));
        tasks.spawn(run_reporter(
            dispatcher,
            state.clone(),
            config.report_interval(),
            cancel.clone(),
        ));

        Ok(Self {
            cancel,
            tasks,
            state,
        })
    }

    pub fn state(&self) -> &SharedAgentState {
        &self.state
    }

    /// Cancels every loop and waits up to `grace` for them to finish.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        let join_all = async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Agent task failed");
                }
            }
        };
        if tokio::time::timeout(grace, join_all).await.is_err() {
            tracing::warn!(grace_secs = grace.as_secs(), "Agent tasks did not stop in time, aborting");
            self.tasks.abort_all();
        }
    }
}
