use super::{failure, is_json, BoundaryState, EncryptedPayload, SkipEncryption};
use crate::field::FieldValue;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Replace JSON response bodies with an encrypted payload
///
/// Status and headers are kept, except `Content-Length`, which is recomputed.
/// Any failure becomes a bare 500 so no plaintext escapes.
pub async fn encrypt_response(
    State(state): State<Arc<BoundaryState>>,
    request: Request,
    next: Next,
) -> Response {
    let skip = request.extensions().get::<SkipEncryption>().is_some();
    let context = match state.context(request.headers()) {
        Ok(context) => context,
        Err(e) => {
            warn!("Unreadable encryption context header: {}", e);
            return failure(StatusCode::BAD_REQUEST, "invalid_context");
        }
    };

    let response = next.run(request).await;

    if skip
        || response.extensions().get::<SkipEncryption>().is_some()
        || !is_json(response.headers())
    {
        return response;
    }

    let (mut parts, body) = response.into_parts();

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to buffer response body for encryption: {}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "encryption_failed");
        }
    };

    let text = match String::from_utf8(bytes.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            error!("JSON response body is not valid UTF-8");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "encryption_failed");
        }
    };

    let codec = state.codec.clone();
    let sealed = state
        .pool
        .run(move || {
            let envelope = codec.encrypt_field(&FieldValue::String(text), context.as_deref())?;
            Ok(serde_json::to_vec(&EncryptedPayload::new(envelope))?)
        })
        .await;

    match sealed {
        Ok(body) => {
            debug!("Encrypted {} byte response body", bytes.len());
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Response::from_parts(parts, Body::from(body))
        }
        Err(e) => {
            error!("Response encryption failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "encryption_failed")
        }
    }
}
