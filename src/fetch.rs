use crate::error::FetchError;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

/// Outbound HTTP gate shared by every upstream client.
///
/// Enforces a per-call timeout and a global cap on concurrently in-flight
/// requests; callers beyond the cap queue FIFO on the semaphore instead of
/// being rejected. No caching happens at this layer.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    permits: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(max_in_flight: usize) -> Result<Self, FetchError> {
        let user_agent = format!("cinescope/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(DEFAULT_TIMEOUT)
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Fatal("fetcher semaphore closed".into()))?;
        let res = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(url, e))?;
        let status = res.status();
        let text = res.text().await.map_err(|e| classify_transport(url, e))?;
        if !status.is_success() {
            return Err(classify_status(url, status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| FetchError::Terminal(format!("{url}: JSON parse failed: {e}")))
    }
}

fn classify_transport(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Retryable(format!("{url}: request timed out"))
    } else {
        FetchError::Retryable(format!("{url}: transport error: {e}"))
    }
}

fn classify_status(url: &str, status: StatusCode, body: &str) -> FetchError {
    // 429 is upstream rate limiting, worth retrying; other 4xx are terminal.
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        FetchError::Terminal(format!("{url} -> {status}: {body}"))
    } else {
        FetchError::Retryable(format!("{url} -> {status}: {body}"))
    }
}
