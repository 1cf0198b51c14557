#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use std::sync::Arc;
use telemon_common::crypto::PayloadDecryptor;
use telemon_common::sign::Signer;
use telemon_server::app;
use telemon_server::ingest::IngestService;
use telemon_server::persistence::PersistenceScheduler;
use telemon_server::state::AppState;
use telemon_server::subnet::TrustedSubnets;
use telemon_storage::StorageEngine;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub storage: Arc<dyn StorageEngine>,
    pub state: AppState,
    pub app: axum::Router,
}

#[derive(Default)]
pub struct ContextOptions {
    pub dsn: Option<String>,
    pub signing_key: Option<&'static str>,
    pub decryptor: Option<PayloadDecryptor>,
    pub trusted_subnets: Vec<&'static str>,
    /// Write-through snapshot file name inside the temp dir.
    pub snapshot: Option<&'static str>,
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(ContextOptions::default())
}

pub fn build_test_context_with(options: ContextOptions) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let dsn = options.dsn.unwrap_or_else(|| "memory://".to_string());
    let storage = telemon_storage::open_storage(&dsn)?;

    let persistence = options.snapshot.map(|name| {
        Arc::new(PersistenceScheduler::new(
            storage.clone(),
            temp_dir.path().join(name),
            std::time::Duration::ZERO,
        ))
    });
    let ingest = IngestService::new(
        storage.clone(),
        persistence,
        TrustedSubnets::parse(&options.trusted_subnets)?,
    );
    let state = AppState::new(
        Arc::new(ingest),
        options.signing_key.and_then(Signer::new),
        options.decryptor.map(Arc::new),
    );
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        storage,
        state,
        app,
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response should be json")
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");
    send(app, req).await
}

pub async fn post_json(app: &axum::Router, uri: &str, body: serde_json::Value) -> TestResponse {
    request(
        app,
        "POST",
        uri,
        &[("content-type", "application/json")],
        body.to_string(),
    )
    .await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "GET", uri, &[], Body::empty()).await
}
