//! Shared building blocks for the telemon agent and collector.
//!
//! The data model lives in [`types`]; everything an HTTP payload passes
//! through on its way between the two processes (gzip in [`compress`],
//! HMAC signatures in [`sign`], RSA encryption in [`crypto`]) is kept here so
//! both sides agree on the envelope byte for byte.

pub mod compress;
pub mod crypto;
pub mod error;
pub mod retry;
pub mod sign;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}

/// Header carrying the base64 HMAC-SHA256 signature of a request or response body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header (and gRPC metadata key) carrying the agent's own address for
/// trusted-subnet checks.
pub const REAL_IP_HEADER: &str = "x-real-ip";
