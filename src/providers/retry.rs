use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(1);
pub(crate) const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(8);

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Retry state for one request. `max_retries` counts retries, not attempts.
pub(crate) struct Backoff {
    provider: &'static str,
    max_retries: usize,
    attempt: usize,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new(provider: &'static str, max_retries: usize) -> Self {
        Self {
            provider,
            max_retries,
            attempt: 0,
            delay: RATE_LIMIT_BASE_DELAY,
        }
    }

    pub(crate) fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub(crate) async fn wait(&mut self, retry_after: Option<Duration>) {
        self.attempt += 1;
        let mut wait = self.delay;
        if let Some(retry_after) = retry_after
            && retry_after > wait
        {
            wait = retry_after.min(RATE_LIMIT_MAX_DELAY);
        }
        warn!(
            "{} rate limited; retrying in {:.1}s (retry {}/{})",
            self.provider,
            wait.as_secs_f32(),
            self.attempt,
            self.max_retries
        );
        sleep(wait).await;
        self.delay = next_delay(self.delay);
    }
}

pub(crate) fn next_delay(current: Duration) -> Duration {
    let next_secs = current
        .as_secs()
        .saturating_mul(2)
        .max(RATE_LIMIT_BASE_DELAY.as_secs());
    Duration::from_secs(next_secs).min(RATE_LIMIT_MAX_DELAY)
}
