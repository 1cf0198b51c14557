use crate::transport::{DeliveryError, Transport};
use async_trait::async_trait;
use std::time::Duration;
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{Metric, UpdatesRequest};
use telemon_common::types::MetricRecord;
use telemon_common::REAL_IP_HEADER;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};

/// Delivers metrics through the collector's `Updates` RPC.
///
/// The channel connects lazily, so an unreachable collector surfaces as a
/// retryable `Unavailable` status on the first call instead of at startup.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    real_ip: Option<MetadataValue<tonic::metadata::Ascii>>,
}

impl GrpcTransport {
    pub fn new(uri: &str, timeout: Duration, real_ip: Option<String>) -> Result<Self, DeliveryError> {
        let endpoint = Endpoint::from_shared(uri.to_string())
            .map_err(|_| DeliveryError::Endpoint(uri.to_string()))?
            .connect_timeout(timeout)
            .timeout(timeout);
        let real_ip = real_ip.and_then(|ip| ip.parse().ok());
        Ok(Self {
            client: MetricsClient::new(endpoint.connect_lazy()),
            real_ip,
        })
    }

    async fn updates(&self, metrics: Vec<Metric>) -> Result<(), DeliveryError> {
        let mut request = tonic::Request::new(UpdatesRequest { metrics });
        if let Some(ip) = &self.real_ip {
            request.metadata_mut().insert(REAL_IP_HEADER, ip.clone());
        }
        self.client.clone().updates(request).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send_batch(&self, metrics: &[MetricRecord]) -> Result<(), DeliveryError> {
        self.updates(metrics.iter().map(Metric::from).collect()).await
    }

    async fn send_one(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
        self.updates(vec![Metric::from(metric)]).await
    }
}
