use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// 429 and 5xx are worth another attempt; everything else is final.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Exponential backoff: 500ms, 1s, 2s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF.saturating_mul(2u32.saturating_pow(attempt))
}

/// Send a request, retrying connect/timeout errors and transient statuses
/// up to `max_retries` times. Requests with streaming bodies are sent once.
pub async fn send_with_retry(
    request: RequestBuilder,
    max_retries: u32,
) -> Result<Response, reqwest::Error> {
    let mut attempt = 0;
    loop {
        let Some(req) = request.try_clone() else {
            return request.send().await;
        };

        match req.send().await {
            Ok(resp) if is_transient(resp.status()) && attempt < max_retries => {
                warn!(status = %resp.status(), attempt, "transient HTTP status, retrying");
            }
            Ok(resp) => return Ok(resp),
            Err(e) if (e.is_timeout() || e.is_connect()) && attempt < max_retries => {
                warn!(error = %e, attempt, "HTTP transport error, retrying");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt += 1;
    }
}
