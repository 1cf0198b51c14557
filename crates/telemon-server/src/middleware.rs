use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use telemon_common::compress;

use crate::logging::TraceId;
use crate::state::AppState;

/// Signature header, lowercase as required by `HeaderName::from_static`.
static SIGNATURE_HEADER: HeaderName = HeaderName::from_static("hashsha256");

static REAL_IP_HEADER: HeaderName = HeaderName::from_static(telemon_common::REAL_IP_HEADER);

/// Largest request body accepted before decoding.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

fn trace_id(extensions: &axum::http::Extensions) -> String {
    extensions
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

/// Address the request is attributed to: `X-Real-IP` when present, else the
/// peer address of the connection.
pub fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    match headers.get(&REAL_IP_HEADER) {
        Some(value) => value.to_str().ok().and_then(|s| s.trim().parse().ok()),
        None => peer.map(|addr| addr.ip()),
    }
}

/// Rejects requests whose source lies outside the trusted subnets.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let source = source_ip(req.headers(), peer);
    if let Err(e) = state.ingest.authorize(source) {
        return e.into_response();
    }
    next.run(req).await
}

fn header_names_gzip(headers: &HeaderMap, name: HeaderName) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(compress::names_gzip)
}

/// Opens request envelopes (decrypt, verify, gunzip) and seals responses
/// (sign, gzip).
///
/// The two directions sign different bytes. A request signature covers the
/// body as the agent compressed it, after decryption and before gunzip. A
/// response signature covers the uncompressed body, so a client checks it
/// after undoing `Content-Encoding`.
pub async fn payload_envelope(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let accepts_gzip = header_names_gzip(req.headers(), ACCEPT_ENCODING);
    let req = match open_request(&state, req).await {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let response = next.run(req).await;
    seal_response(&state, response, accepts_gzip).await
}

async fn open_request(state: &AppState, req: Request) -> Result<Request, Response> {
    let (mut parts, body) = req.into_parts();
    let trace_id = trace_id(&parts.extensions);
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| plain(StatusCode::BAD_REQUEST, "invalid payload"))?;
    if bytes.is_empty() {
        return Ok(Request::from_parts(parts, Body::from(bytes)));
    }

    let mut payload: Bytes = bytes;
    if let Some(decryptor) = &state.decryptor {
        payload = decryptor
            .decrypt(&payload)
            .map_err(|e| {
                tracing::warn!(trace_id = %trace_id, error = %e, "Request body could not be decrypted");
                plain(StatusCode::BAD_REQUEST, "invalid payload")
            })?
            .into();
    }

    if let Some(signer) = &state.signer {
        let signature = parts
            .headers
            .get(&SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = signature.is_some_and(|sig| signer.verify(&payload, sig));
        if !valid {
            tracing::warn!(
                trace_id = %trace_id,
                present = signature.is_some(),
                "Request signature rejected"
            );
            return Err(plain(StatusCode::BAD_REQUEST, "invalid sign"));
        }
    }

    if header_names_gzip(&parts.headers, CONTENT_ENCODING) {
        payload = compress::gunzip(&payload)
            .map_err(|e| {
                tracing::warn!(trace_id = %trace_id, error = %e, "Request body is not valid gzip");
                plain(StatusCode::BAD_REQUEST, "invalid payload")
            })?
            .into();
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
    }

    Ok(Request::from_parts(parts, Body::from(payload)))
}

async fn seal_response(state: &AppState, response: Response, accepts_gzip: bool) -> Response {
    if state.signer.is_none() && !accepts_gzip {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response body");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::from(bytes));
    }

    // Signed before compression; see `payload_envelope`.
    if let Some(signer) = &state.signer {
        if let Ok(value) = HeaderValue::from_str(&signer.sign(&bytes)) {
            parts.headers.insert(SIGNATURE_HEADER.clone(), value);
        }
    }

    if accepts_gzip {
        match compress::gzip(&bytes) {
            Ok(compressed) => {
                parts
                    .headers
                    .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                parts.headers.remove(CONTENT_LENGTH);
                return Response::from_parts(parts, Body::from(compressed));
            }
            Err(e) => tracing::warn!(error = %e, "Response compression failed, sending plain body"),
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}
