use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Builds the shared outbound client. System proxy discovery is opt-in via
/// `EARTHLINK_ENABLE_SYSTEM_PROXY`; it can panic on some platforms, so it is
/// attempted behind `catch_unwind` with a `no_proxy` fallback.
pub fn build_http_client_with_timeout(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("EARTHLINK_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        if let Ok(Ok(client)) = std::panic::catch_unwind(|| attempt_build(timeout, false)) {
            return Ok(client);
        }

        tracing::warn!(
            "HTTP client initialization with system proxy discovery failed; retrying with no_proxy"
        );
    }

    match std::panic::catch_unwind(|| attempt_build(timeout, true)) {
        Ok(result) => result.context("Failed to initialize HTTP client (no_proxy fallback)"),
        Err(_) => Err(anyhow!(
            "Failed to initialize HTTP client (no_proxy fallback panicked)"
        )),
    }
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
