use reqwest::StatusCode;
use std::time::Duration;

/// Shared client for every outbound adapter. reqwest pools connections per host,
/// so one client is built at startup and cloned into each adapter.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("train_gateway/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Server errors, rate limits and request timeouts are worth retrying.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Transport failures (connect, reset, timeout) are retryable; a body we
/// could not decode is not.
pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    !err.is_decode() && !err.is_builder()
}

/// Short description of a failed response body, safe to log.
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "é".repeat(300);
        let t = truncate_body(&long);
        assert!(t.len() <= 204);
        assert!(t.ends_with('…'));
    }
}
