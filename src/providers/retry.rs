use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_MAX_RETRIES: usize = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff for transient API failures: rate limits, overloaded
/// upstreams and requests that timed out or never connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).max(self.base_delay).min(self.max_delay)
    }

    pub(crate) async fn wait(
        &self,
        attempt: usize,
        delay: Duration,
        retry_after: Option<Duration>,
        reason: &str,
    ) -> Duration {
        let wait = match retry_after {
            Some(retry_after) if retry_after > delay => retry_after.min(self.max_delay),
            _ => delay,
        };
        warn!(
            "translation request {}; retrying in {:.1}s (attempt {}/{})",
            reason,
            wait.as_secs_f32(),
            attempt,
            self.max_attempts
        );
        sleep(wait).await;
        self.next_delay(delay)
    }
}

pub(crate) fn is_retryable(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if matches!(status.as_u16(), 500 | 502 | 503 | 504 | 529) {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}
