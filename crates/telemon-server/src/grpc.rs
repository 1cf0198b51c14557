use crate::ingest::IngestError;
use crate::state::AppState;
use std::net::IpAddr;
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{
    GetMetricRequest, GetMetricResponse, ListMetricsRequest, ListMetricsResponse, PingRequest,
    PingResponse, UpdatesRequest, UpdatesResponse,
};
use telemon_common::proto;
use telemon_common::types::{MetricKind, StructuredMetric};
use tonic::{Request, Response, Status};

impl From<IngestError> for Status {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::BadRequest(inner) => Status::invalid_argument(inner.to_string()),
            IngestError::NotFound => Status::not_found("not found"),
            IngestError::Internal(_) => Status::internal("internal error"),
            IngestError::Forbidden => Status::permission_denied("forbidden"),
        }
    }
}

pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Applies the trusted-subnet check to `x-real-ip`, falling back to the
    /// peer address of the connection.
    fn authorize<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let source = match request.metadata().get(telemon_common::REAL_IP_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<IpAddr>().ok()),
            None => request.remote_addr().map(|addr| addr.ip()),
        };
        self.state.ingest.authorize(source)?;
        Ok(())
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn updates(
        &self,
        request: Request<UpdatesRequest>,
    ) -> Result<Response<UpdatesResponse>, Status> {
        self.authorize(&request)?;
        let metrics: Vec<StructuredMetric> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(StructuredMetric::from)
            .collect();
        let count = self.state.ingest.update_batch(&metrics)?;
        tracing::debug!(count, "Updates received over gRPC");
        Ok(Response::new(UpdatesResponse {}))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<GetMetricResponse>, Status> {
        self.authorize(&request)?;
        let req = request.into_inner();
        let kind = MetricKind::from_proto(req.r#type).map_err(IngestError::from)?;
        let record = self.state.ingest.lookup(kind, &req.id)?;
        Ok(Response::new(GetMetricResponse {
            metric: Some(proto::Metric::from(&record)),
        }))
    }

    async fn list_metrics(
        &self,
        request: Request<ListMetricsRequest>,
    ) -> Result<Response<ListMetricsResponse>, Status> {
        self.authorize(&request)?;
        let metrics = self
            .state
            .ingest
            .all()?
            .iter()
            .map(proto::Metric::from)
            .collect();
        Ok(Response::new(ListMetricsResponse { metrics }))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        self.authorize(&request)?;
        self.state.ingest.ping()?;
        Ok(Response::new(PingResponse {}))
    }
}
