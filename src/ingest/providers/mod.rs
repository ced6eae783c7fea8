// src/ingest/providers/mod.rs
pub mod sheet;
pub mod telephony;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};

use crate::error::{PipelineError, Result};
use crate::ingest::types::SourceTag;

pub use sheet::SheetProvider;
pub use telephony::TelephonyProvider;

const USER_AGENT: &str = "call-center-pipeline/0.1";

pub(crate) fn build_client(tag: SourceTag, timeout: Option<Duration>) -> Result<Client> {
    let mut b = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4));
    if let Some(t) = timeout {
        b = b.timeout(t);
    }
    b.build()
        .map_err(|e| PipelineError::Configuration(format!("{tag}: http client: {e}")))
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// GET with bounded retries on transport errors, 5xx and 429.
/// Other non-2xx statuses fail immediately. Returns the body text.
pub(crate) async fn get_text_with_retries(
    tag: SourceTag,
    max_retries: u8,
    build: impl Fn() -> RequestBuilder,
) -> Result<String> {
    let mut attempt: u16 = 0;
    loop {
        attempt += 1;
        let retry_left = attempt <= u16::from(max_retries);

        match build().send().await {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    return rsp
                        .text()
                        .await
                        .map_err(|e| PipelineError::source_unavailable(tag, format!("reading body: {e}")));
                }
                if retry_left && is_retryable(status) {
                    tracing::debug!(target: "ingest", source = %tag, %status, attempt, "retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                return Err(PipelineError::source_unavailable(tag, format!("HTTP {status}")));
            }
            Err(e) => {
                if retry_left && !e.is_timeout() {
                    tracing::debug!(target: "ingest", source = %tag, error = %e, attempt, "retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                return Err(PipelineError::source_unavailable(tag, e));
            }
        }
    }
}

fn backoff(attempt: u16) -> Duration {
    Duration::from_millis(250u64 << (attempt.saturating_sub(1)).min(4))
}
