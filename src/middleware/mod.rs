//! HTTP boundary middleware
//!
//! Two axum middlewares that move payloads between plaintext and envelope
//! form at the service edge:
//!
//! - [`decrypt_request`] unwraps `{"encrypted":true,"data":"<envelope>"}`
//!   request bodies before the handler sees them
//! - [`encrypt_response`] wraps JSON response bodies the same way
//!
//! The envelope context comes from a request header (`x-encryption-context`
//! by default). Clients get generic error bodies; detail goes to the log.

mod decrypt;
mod encrypt;

pub use decrypt::decrypt_request;
pub use encrypt::encrypt_response;

use crate::config::MiddlewareConfig;
use crate::error::{Error, Result};
use crate::field::FieldCodec;
use crate::pool::DerivationPool;
use axum::http::header::CONTENT_TYPE;
use axum::http::header::ToStrError;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marker that disables response encryption
///
/// Insert into the request extensions (by an outer layer) or the response
/// extensions (by the handler).
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipEncryption;

/// HTTP payload wrapper around a serialized envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedPayload {
    pub encrypted: bool,
    pub data: String,
}

impl EncryptedPayload {
    pub fn new(envelope: String) -> Self {
        EncryptedPayload {
            encrypted: true,
            data: envelope,
        }
    }

    /// The envelope, if `body` is exactly an encrypted payload
    pub fn parse(body: &[u8]) -> Option<String> {
        match serde_json::from_slice::<EncryptedPayload>(body) {
            Ok(payload) if payload.encrypted => Some(payload.data),
            _ => None,
        }
    }
}

/// Shared state for both middlewares
pub struct BoundaryState {
    codec: Arc<FieldCodec>,
    pool: DerivationPool,
    context_header: HeaderName,
    max_body_bytes: usize,
}

impl BoundaryState {
    pub fn new(
        codec: Arc<FieldCodec>,
        pool: DerivationPool,
        config: &MiddlewareConfig,
    ) -> Result<Self> {
        let context_header = HeaderName::from_bytes(config.context_header.as_bytes())
            .map_err(|_| {
                Error::Configuration(format!(
                    "Invalid context header name: {:?}",
                    config.context_header
                ))
            })?;

        Ok(BoundaryState {
            codec,
            pool,
            context_header,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Context for this request, from the configured header
    ///
    /// A header that is present but not visible ASCII is an error rather
    /// than "no context".
    fn context(&self, headers: &HeaderMap) -> std::result::Result<Option<String>, ToStrError> {
        headers
            .get(&self.context_header)
            .map(|v| v.to_str().map(str::to_string))
            .transpose()
    }
}

/// Wrap `router` with request decryption and response encryption
pub fn router_with_boundary(router: Router, state: Arc<BoundaryState>) -> Router {
    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            encrypt_response,
        ))
        .layer(axum::middleware::from_fn_with_state(state, decrypt_request))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn failure(status: StatusCode, code: &str) -> Response {
    (status, Json(serde_json::json!({ "error": code }))).into_response()
}
