use super::{failure, is_json, BoundaryState, EncryptedPayload};
use crate::field::FieldValue;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, warn};

/// Unwrap `{"encrypted":true,"data":"<envelope>"}` request bodies
///
/// Bodies of any other shape reach the handler unchanged. A payload that
/// fails to decrypt, or whose plaintext is not JSON, is answered with 400
/// and the handler never runs.
pub async fn decrypt_request(
    State(state): State<Arc<BoundaryState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.headers().contains_key(CONTENT_TYPE) && !is_json(request.headers()) {
        return next.run(request).await;
    }

    let declared_len = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.max_body_bytes) {
        return failure(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large");
    }

    let (mut parts, body) = request.into_parts();

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not buffer request body: {}", e);
            return failure(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large");
        }
    };

    let Some(envelope) = EncryptedPayload::parse(&bytes) else {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    };

    let context = match state.context(&parts.headers) {
        Ok(context) => context,
        Err(e) => {
            warn!("Unreadable encryption context header: {}", e);
            return failure(StatusCode::BAD_REQUEST, "invalid_context");
        }
    };
    let codec = state.codec.clone();
    let opened = state
        .pool
        .run(move || codec.decrypt_field(&envelope, context.as_deref()))
        .await;

    let value = match opened {
        Ok(FieldValue::String(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Decrypted request body is not JSON: {}", e);
                return failure(StatusCode::BAD_REQUEST, "decryption_failed");
            }
        },
        Ok(FieldValue::Json(value)) => value,
        Err(e) => {
            warn!("Request decryption failed: {}", e);
            return failure(StatusCode::BAD_REQUEST, "decryption_failed");
        }
    };
    let plaintext = value.to_string().into_bytes();

    debug!("Decrypted {} byte request body", plaintext.len());
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(plaintext.len()));
    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    next.run(Request::from_parts(parts, Body::from(plaintext))).await
}
