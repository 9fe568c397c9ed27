//! Shared HTTP helpers for the edge and REST key-value providers

use crate::cache::errors::{StoreError, StoreResult};
use reqwest::StatusCode;
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> StoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::InvalidRequest(format!("Failed to build HTTP client: {e}")))
}

/// Map a non-success HTTP reply onto the store error taxonomy
pub(crate) fn classify_http_failure(operation: &str, status: StatusCode, body: &str) -> StoreError {
    if status == StatusCode::TOO_MANY_REQUESTS || mentions_quota(body) {
        return StoreError::QuotaExceeded(format!("{operation}: {status} {body}"));
    }
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::BAD_GATEWAY
    {
        return StoreError::Connection(format!("{operation}: {status} {body}"));
    }
    if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
        return StoreError::InvalidRequest(format!("{operation}: {status} {body}"));
    }
    StoreError::Backend(format!("{operation}: {status} {body}"))
}

pub(crate) fn mentions_quota(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    lowered.contains("quota") || lowered.contains("limit exceeded")
}

pub(crate) async fn failure_from_response(
    operation: &str,
    response: reqwest::Response,
) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_http_failure(operation, status, &body)
}
