//! Per-tick delivery: one batch request first, a bounded worker pool of
//! per-metric requests as fallback.

use crate::aggregator::MetricSet;
use crate::transport::Transport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemon_common::retry::RetryPolicy;
use telemon_common::types::MetricRecord;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch: bool,
    pub path_style: bool,
    /// Worker pool size on the fallback path.
    pub workers: usize,
    /// Bound for each phase (batch attempt, fan-out) of one tick.
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

/// Outcome of one tick, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    pub batched: bool,
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        Self { transport, config }
    }

    /// Delivers `set`. Never fails: what cannot be delivered is logged and
    /// dropped.
    pub async fn dispatch(&self, set: &MetricSet) -> DeliveryReport {
        let records = set.records();
        if records.is_empty() {
            return DeliveryReport::default();
        }

        if self.config.batch {
            let transport = &self.transport;
            let batch = records.as_slice();
            let attempt = self
                .config
                .retry
                .retry(|| async move { transport.send_batch(batch).await });
            match tokio::time::timeout(self.config.deadline, attempt).await {
                Ok(Ok(())) => {
                    tracing::debug!(
                        transport = self.transport.name(),
                        count = records.len(),
                        "Metrics reported in one batch"
                    );
                    return DeliveryReport {
                        delivered: records.len(),
                        dropped: 0,
                        batched: true,
                    };
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Batch delivery failed, falling back to per-metric delivery");
                }
                Err(_) => {
                    tracing::warn!(
                        deadline_secs = self.config.deadline.as_secs(),
                        "Batch delivery timed out, falling back to per-metric delivery"
                    );
                }
            }
        }

        self.fan_out(records).await
    }

    async fn fan_out(&self, records: Vec<MetricRecord>) -> DeliveryReport {
        let total = records.len();
        let (tx, rx) = mpsc::channel(total);
        for record in records {
            // Capacity equals the record count, so this never fails.
            let _ = tx.try_send(record);
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let delivered = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            workers.spawn(run_worker(
                worker,
                rx.clone(),
                self.transport.clone(),
                self.config.retry,
                self.config.path_style,
                delivered.clone(),
            ));
        }

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Delivery worker panicked");
                }
            }
        };
        if tokio::time::timeout(self.config.deadline, drain).await.is_err() {
            tracing::warn!(
                deadline_secs = self.config.deadline.as_secs(),
                "Per-metric delivery timed out, abandoning in-flight requests"
            );
            workers.abort_all();
        }

        let delivered = delivered.load(Ordering::SeqCst);
        let dropped = total - delivered;
        if dropped > 0 {
            tracing::warn!(delivered, dropped, "Some metrics were not delivered this tick");
        } else {
            tracing::debug!(delivered, "Metrics reported one by one");
        }
        DeliveryReport {
            delivered,
            dropped,
            batched: false,
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<MetricRecord>>>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    path_style: bool,
    delivered: Arc<AtomicUsize>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(record) = next else {
            break;
        };

        let transport = &transport;
        let metric = &record;
        let result = retry
            .retry(|| async move {
                if path_style {
                    transport.send_path(metric).await
                } else {
                    transport.send_one(metric).await
                }
            })
            .await;

        match result {
            Ok(()) => {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(worker, metric = %record.name, error = %e, "Dropping undelivered metric");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeliveryError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        fail_batch: bool,
        fail_name: Option<&'static str>,
        hang: bool,
        batches: StdMutex<Vec<usize>>,
        singles: StdMutex<Vec<String>>,
        paths: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_batch(&self, metrics: &[MetricRecord]) -> Result<(), DeliveryError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_batch {
                return Err(DeliveryError::Status {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            self.batches.lock().unwrap().push(metrics.len());
            Ok(())
        }

        async fn send_one(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_name == Some(metric.name.as_str()) {
                return Err(DeliveryError::Grpc(tonic::Status::unavailable("down")));
            }
            self.singles.lock().unwrap().push(metric.name.clone());
            Ok(())
        }

        async fn send_path(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
            self.paths.lock().unwrap().push(metric.update_path());
            Ok(())
        }
    }

    fn config(batch: bool, path_style: bool) -> DispatcherConfig {
        DispatcherConfig {
            batch,
            path_style,
            workers: 3,
            deadline: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                delta_delay: Duration::from_millis(10),
            },
        }
    }

    fn sample_set() -> MetricSet {
        let mut set = MetricSet::default();
        for i in 0..10 {
            set.gauges.insert(format!("Gauge{i}"), i as f64);
        }
        set.counters.insert("PollCount".to_string(), 4);
        set
    }

    #[tokio::test]
    async fn batch_path_sends_one_request() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), config(true, false));

        let report = dispatcher.dispatch(&sample_set()).await;

        assert_eq!(
            report,
            DeliveryReport {
                delivered: 11,
                dropped: 0,
                batched: true
            }
        );
        assert_eq!(*transport.batches.lock().unwrap(), vec![11]);
        assert!(transport.singles.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_falls_back_to_workers() {
        let transport = Arc::new(RecordingTransport {
            fail_batch: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(transport.clone(), config(true, false));

        let report = dispatcher.dispatch(&sample_set()).await;

        assert!(!report.batched);
        assert_eq!(report.delivered, 11);
        let mut singles = transport.singles.lock().unwrap().clone();
        singles.sort();
        assert_eq!(singles.len(), 11);
        assert!(singles.contains(&"PollCount".to_string()));
    }

    #[tokio::test]
    async fn path_style_uses_legacy_requests() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), config(false, true));

        let report = dispatcher.dispatch(&sample_set()).await;

        assert_eq!(report.delivered, 11);
        let paths = transport.paths.lock().unwrap();
        assert!(paths.contains(&"update/counter/PollCount/4".to_string()));
        assert!(paths.contains(&"update/gauge/Gauge3/3".to_string()));
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_metric_is_dropped_not_requeued() {
        let transport = Arc::new(RecordingTransport {
            fail_name: Some("Gauge5"),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(transport.clone(), config(false, false));

        let report = dispatcher.dispatch(&sample_set()).await;

        assert_eq!(report.delivered, 10);
        assert_eq!(report.dropped, 1);
        assert!(!transport
            .singles
            .lock()
            .unwrap()
            .contains(&"Gauge5".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_stuck_deliveries() {
        let transport = Arc::new(RecordingTransport {
            hang: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(transport.clone(), config(true, false));

        let report = dispatcher.dispatch(&sample_set()).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 11);
    }

    #[tokio::test]
    async fn empty_set_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), config(true, false));

        assert_eq!(
            dispatcher.dispatch(&MetricSet::default()).await,
            DeliveryReport::default()
        );
        assert!(transport.batches.lock().unwrap().is_empty());
    }
}
