use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemon_agent::transport::{Envelope, HttpTransport};
use telemon_agent::{DeliveryError, Transport};
use telemon_common::compress::gunzip;
use telemon_common::retry::Retryable;
use telemon_common::sign::Signer;
use telemon_common::types::{MetricRecord, StructuredMetric};

#[derive(Clone, Debug)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone)]
struct Recorder {
    requests: Arc<Mutex<Vec<Captured>>>,
    status: StatusCode,
}

async fn capture(State(recorder): State<Recorder>, uri: Uri, headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
    recorder.requests.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        headers,
        body,
    });
    let body = if recorder.status.is_success() { "" } else { "not float" };
    (recorder.status, body)
}

async fn spawn_recorder(status: StatusCode) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/updates/", post(capture))
        .route("/update/", post(capture))
        .route("/update/:kind/:name/:value", post(capture))
        .with_state(Recorder {
            requests: requests.clone(),
            status,
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), requests)
}

fn transport(base: &str, signer: Option<Signer>) -> HttpTransport {
    HttpTransport::new(
        base,
        Duration::from_secs(2),
        Envelope::new(signer, None),
        Some("127.0.0.1".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn batch_is_gzipped_and_signed() {
    let (base, requests) = spawn_recorder(StatusCode::OK).await;
    let signer = Signer::new("secret").unwrap();
    let http = transport(&base, Some(signer.clone()));

    http.send_batch(&[
        MetricRecord::gauge("Alloc", 1.5),
        MetricRecord::counter("PollCount", 2),
    ])
    .await
    .unwrap();

    let captured = requests.lock().unwrap()[0].clone();
    assert_eq!(captured.path, "/updates/");
    assert_eq!(captured.headers["content-encoding"], "gzip");
    assert_eq!(captured.headers["content-type"], "application/json");
    assert_eq!(captured.headers["x-real-ip"], "127.0.0.1");

    let signature = captured.headers["hashsha256"].to_str().unwrap();
    assert!(signer.verify(&captured.body, signature));

    let json = gunzip(&captured.body).unwrap();
    let metrics: Vec<StructuredMetric> = serde_json::from_slice(&json).unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[1].to_record().unwrap(), MetricRecord::counter("PollCount", 2));
}

#[tokio::test]
async fn path_style_puts_metric_in_url() {
    let (base, requests) = spawn_recorder(StatusCode::OK).await;
    let http = transport(&base, None);

    http.send_path(&MetricRecord::counter("PollCount", 4)).await.unwrap();
    http.send_one(&MetricRecord::gauge("Alloc", 2.0)).await.unwrap();

    let captured = requests.lock().unwrap().clone();
    assert_eq!(captured[0].path, "/update/counter/PollCount/4");
    assert!(captured[0].body.is_empty());
    assert_eq!(captured[1].path, "/update/");
    assert!(captured[1].headers.get("hashsha256").is_none());
}

#[tokio::test]
async fn rejected_request_is_fatal() {
    let (base, _requests) = spawn_recorder(StatusCode::BAD_REQUEST).await;
    let http = transport(&base, None);

    let err = http
        .send_one(&MetricRecord::gauge("Alloc", 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Status { status: 400, ref body } if body == "not float"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let http = transport(&format!("http://{addr}"), None);
    let err = http
        .send_batch(&[MetricRecord::gauge("Alloc", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Http(_)));
    assert!(err.is_retryable());
}
