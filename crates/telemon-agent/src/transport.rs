//! Delivery transports and the request envelope.
//!
//! JSON bodies are gzip-compressed, signed over the compressed bytes and, when
//! a collector public key is configured, RSA-encrypted as the outermost layer.

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use telemon_common::compress;
use telemon_common::crypto::{CryptoError, PayloadEncryptor};
use telemon_common::retry::Retryable;
use telemon_common::sign::Signer;
use telemon_common::types::{MetricRecord, StructuredMetric};
use telemon_common::{REAL_IP_HEADER, SIGNATURE_HEADER};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to encrypt payload: {0}")]
    Encrypt(#[from] CryptoError),

    /// The request never produced a response (connect, timeout, broken body).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The collector answered with a non-2xx status.
    #[error("collector answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rpc failed: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Http(e) => {
                !(e.is_builder() || e.is_decode() || e.is_redirect() || e.is_status())
            }
            DeliveryError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Aborted
            ),
            _ => false,
        }
    }
}

/// Something that can carry metrics to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name used in logs.
    fn name(&self) -> &'static str;

    /// Delivers the whole set in one request.
    async fn send_batch(&self, metrics: &[MetricRecord]) -> Result<(), DeliveryError>;

    /// Delivers one metric as a structured request.
    async fn send_one(&self, metric: &MetricRecord) -> Result<(), DeliveryError>;

    /// Delivers one metric in the legacy path-encoded form. Transports without
    /// such a form fall back to [`Transport::send_one`].
    async fn send_path(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
        self.send_one(metric).await
    }
}

/// A body ready to go on the wire plus its signature.
#[derive(Debug)]
pub struct SealedBody {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// Agent-side envelope: gzip, then sign, then optionally encrypt.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    signer: Option<Signer>,
    encryptor: Option<PayloadEncryptor>,
}

impl Envelope {
    pub fn new(signer: Option<Signer>, encryptor: Option<PayloadEncryptor>) -> Self {
        Self { signer, encryptor }
    }

    pub fn seal(&self, json: &[u8]) -> Result<SealedBody, DeliveryError> {
        let compressed = compress::gzip(json).map_err(DeliveryError::Compress)?;
        let signature = self.signer.as_ref().map(|s| s.sign(&compressed));
        let body = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&compressed)?,
            None => compressed,
        };
        Ok(SealedBody { body, signature })
    }
}

/// Delivers metrics over the collector's HTTP API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    envelope: Envelope,
    real_ip: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        envelope: Envelope,
        real_ip: Option<String>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            envelope,
            real_ip,
        })
    }

    async fn post_json(&self, path: &str, json: Vec<u8>) -> Result<(), DeliveryError> {
        let sealed = self.envelope.seal(&json)?;
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(sealed.body);
        if let Some(signature) = sealed.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.as_str());
        }
        check_status(request.send().await?).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send_batch(&self, metrics: &[MetricRecord]) -> Result<(), DeliveryError> {
        let payload: Vec<StructuredMetric> = metrics.iter().map(StructuredMetric::from).collect();
        self.post_json("/updates/", serde_json::to_vec(&payload)?)
            .await
    }

    async fn send_one(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
        let payload = StructuredMetric::from(metric);
        self.post_json("/update/", serde_json::to_vec(&payload)?)
            .await
    }

    async fn send_path(&self, metric: &MetricRecord) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, metric.update_path()))
            .header(CONTENT_TYPE, "text/plain");
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.as_str());
        }
        check_status(request.send().await?).await
    }
}

/// Address of the local interface used to reach `server_addr`, reported to
/// the collector for its trusted-subnet check.
pub fn local_ip_for(server_addr: &str) -> Option<String> {
    let host_port = server_addr
        .split("://")
        .last()
        .unwrap_or(server_addr)
        .trim_end_matches('/');
    let host_port = host_port.split('/').next().unwrap_or(host_port);
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(host_port).ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::crypto::PayloadDecryptor;

    #[test]
    fn envelope_signs_compressed_bytes() {
        let signer = Signer::new("secret").unwrap();
        let envelope = Envelope::new(Some(signer.clone()), None);

        let sealed = envelope.seal(br#"{"id":"Alloc"}"#).unwrap();
        let signature = sealed.signature.unwrap();
        assert!(signer.verify(&sealed.body, &signature));
        assert_eq!(compress::gunzip(&sealed.body).unwrap(), br#"{"id":"Alloc"}"#);
    }

    #[test]
    fn encryption_wraps_the_signed_body() {
        let private = rsa_key();
        let signer = Signer::new("secret").unwrap();
        let envelope = Envelope::new(
            Some(signer.clone()),
            Some(PayloadEncryptor::new(private.to_public_key())),
        );

        let sealed = envelope.seal(b"[]").unwrap();
        let compressed = PayloadDecryptor::new(private).decrypt(&sealed.body).unwrap();
        assert!(signer.verify(&compressed, &sealed.signature.unwrap()));
        assert_eq!(compress::gunzip(&compressed).unwrap(), b"[]");
    }

    #[test]
    fn retry_classification() {
        let unavailable = DeliveryError::Grpc(tonic::Status::unavailable("down"));
        let invalid = DeliveryError::Grpc(tonic::Status::invalid_argument("bad"));
        let rejected = DeliveryError::Status {
            status: 400,
            body: "not float".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(!invalid.is_retryable());
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn local_ip_is_found_for_loopback() {
        assert_eq!(local_ip_for("http://127.0.0.1:8080/").as_deref(), Some("127.0.0.1"));
        assert_eq!(local_ip_for("127.0.0.1:8080").as_deref(), Some("127.0.0.1"));
    }

    fn rsa_key() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }
}
