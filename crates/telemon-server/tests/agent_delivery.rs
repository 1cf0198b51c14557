//! Agent transports talking to a real collector over loopback.

mod common;

use common::{build_test_context_with, ContextOptions, TestContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemon_agent::grpc::GrpcTransport;
use telemon_agent::transport::{Envelope, HttpTransport};
use telemon_agent::{AgentConfig, AgentHandle, Dispatcher, DispatcherConfig, MetricSet, Transport};
use telemon_common::crypto::{PayloadDecryptor, PayloadEncryptor};
use telemon_common::proto::metrics_server::MetricsServer;
use telemon_common::retry::RetryPolicy;
use telemon_common::sign::Signer;
use telemon_common::types::{MetricKind, MetricValue};
use telemon_server::grpc::MetricsService;
use tonic::transport::server::TcpIncoming;

async fn serve_http(ctx: &TestContext) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ctx.app.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}

async fn serve_grpc(ctx: &TestContext) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
    let service = MetricsServer::new(MetricsService::new(ctx.state.clone()));
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn dispatcher_config(batch: bool, path_style: bool) -> DispatcherConfig {
    DispatcherConfig {
        batch,
        path_style,
        workers: 2,
        deadline: Duration::from_secs(10),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            delta_delay: Duration::from_millis(50),
        },
    }
}

fn sample_set(poll_count: i64) -> MetricSet {
    let mut set = MetricSet::default();
    set.gauges.insert("Alloc".to_string(), 1024.0);
    set.gauges.insert("RandomValue".to_string(), 0.125);
    set.counters.insert("PollCount".to_string(), poll_count);
    set
}

fn counter(ctx: &TestContext, name: &str) -> MetricValue {
    ctx.storage.get(MetricKind::Counter, name).unwrap().value
}

#[tokio::test]
async fn signed_encrypted_batch_reaches_storage() {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = private.to_public_key();
    let ctx = build_test_context_with(ContextOptions {
        signing_key: Some("shared-key"),
        decryptor: Some(PayloadDecryptor::new(private)),
        trusted_subnets: vec!["127.0.0.0/8"],
        ..Default::default()
    })
    .unwrap();
    let base = serve_http(&ctx).await;

    let transport = HttpTransport::new(
        base,
        Duration::from_secs(5),
        Envelope::new(Signer::new("shared-key"), Some(PayloadEncryptor::new(public))),
        Some("127.0.0.1".to_string()),
    )
    .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(transport), dispatcher_config(true, false));

    let report = dispatcher.dispatch(&sample_set(5)).await;
    assert!(report.batched);
    assert_eq!(report.delivered, 3);

    dispatcher.dispatch(&sample_set(7)).await;
    assert_eq!(counter(&ctx, "PollCount"), MetricValue::Counter(12));
    assert_eq!(
        ctx.storage.get(MetricKind::Gauge, "Alloc").unwrap().value,
        MetricValue::Gauge(1024.0)
    );
}

#[tokio::test]
async fn wrong_key_is_rejected_without_retry_storm() {
    let ctx = build_test_context_with(ContextOptions {
        signing_key: Some("collector-key"),
        ..Default::default()
    })
    .unwrap();
    let base = serve_http(&ctx).await;

    let transport = HttpTransport::new(
        base,
        Duration::from_secs(5),
        Envelope::new(Signer::new("agent-key"), None),
        None,
    )
    .unwrap();
    let err = transport
        .send_batch(&sample_set(1).records())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "collector answered 400: invalid sign");
    assert!(ctx.storage.get_all().unwrap().is_empty());
}

#[tokio::test]
async fn path_style_fallback_delivers_each_metric() {
    let ctx = build_test_context_with(ContextOptions::default()).unwrap();
    let base = serve_http(&ctx).await;

    let transport = HttpTransport::new(base, Duration::from_secs(5), Envelope::default(), None).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(transport), dispatcher_config(false, true));

    let report = dispatcher.dispatch(&sample_set(3)).await;
    assert!(!report.batched);
    assert_eq!(report.delivered, 3);
    assert_eq!(counter(&ctx, "PollCount"), MetricValue::Counter(3));
    assert_eq!(ctx.storage.get_all().unwrap().len(), 3);
}

#[tokio::test]
async fn untrusted_agent_is_forbidden() {
    let ctx = build_test_context_with(ContextOptions {
        trusted_subnets: vec!["10.0.0.0/8"],
        ..Default::default()
    })
    .unwrap();
    let base = serve_http(&ctx).await;

    // No X-Real-IP: the loopback peer address is checked instead.
    let transport = HttpTransport::new(base, Duration::from_secs(5), Envelope::default(), None).unwrap();
    let err = transport
        .send_batch(&sample_set(1).records())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn grpc_transport_updates_storage() {
    let ctx = build_test_context_with(ContextOptions::default()).unwrap();
    let uri = serve_grpc(&ctx).await;

    let transport = GrpcTransport::new(&uri, Duration::from_secs(5), Some("127.0.0.1".into())).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(transport), dispatcher_config(true, false));

    for poll_count in [2, 3] {
        let report = dispatcher.dispatch(&sample_set(poll_count)).await;
        assert_eq!(report.delivered, 3);
    }
    assert_eq!(counter(&ctx, "PollCount"), MetricValue::Counter(5));
}

#[tokio::test]
async fn running_agent_reports_process_metrics() {
    let ctx = build_test_context_with(ContextOptions::default()).unwrap();
    let base = serve_http(&ctx).await;

    let config_path = ctx.temp_dir.path().join("agent.toml");
    std::fs::write(
        &config_path,
        format!(
            "server_addr = \"{base}\"\npoll_interval_secs = 1\nreport_interval_secs = 1\n\n[retry]\nmax_attempts = 1\n"
        ),
    )
    .unwrap();
    let config = AgentConfig::load(config_path.to_str().unwrap()).unwrap();

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(
            config.http_base_url(),
            config.request_timeout(),
            Envelope::default(),
            None,
        )
        .unwrap(),
    );
    let agent = AgentHandle::start_with_transport(&config, transport).unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    agent.shutdown(Duration::from_secs(2)).await;

    assert!(matches!(
        ctx.storage.get(MetricKind::Counter, "PollCount").unwrap().value,
        MetricValue::Counter(n) if n > 0
    ));
    for gauge in ["RandomValue", "TotalMemory", "FreeMemory", "ResidentMemory", "CPUutilization1"] {
        assert!(
            ctx.storage.get(MetricKind::Gauge, gauge).is_ok(),
            "missing gauge {gauge}"
        );
    }
}
