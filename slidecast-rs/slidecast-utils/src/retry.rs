use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
const ERROR_BODY_LIMIT: usize = 200;

/// Failure reported by a remote collaborator (language model, voice, image service).
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} is temporarily unavailable: {message}")]
    Retryable {
        service: &'static str,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("{service} request failed: {message}")]
    Fatal {
        service: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn retryable(service: &'static str, message: impl Into<String>) -> Self {
        UpstreamError::Retryable {
            service,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(service: &'static str, message: impl Into<String>) -> Self {
        UpstreamError::Fatal {
            service,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status. Rate limits and server errors are transient.
    pub fn from_status(
        service: &'static str,
        status: u16,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body.trim(), ERROR_BODY_LIMIT));
        match status {
            408 | 429 | 500..=599 => UpstreamError::Retryable {
                service,
                message,
                retry_after,
            },
            _ => UpstreamError::Fatal { service, message },
        }
    }

    pub fn from_transport(service: &'static str, error: &reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            UpstreamError::retryable(service, error.to_string())
        } else {
            UpstreamError::fatal(service, error.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Retryable { .. })
    }

}

/// Errors that may clear up on their own and are worth another attempt.
pub trait Transient {
    fn is_transient(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Convert into the error reported once the retry budget is spent.
    fn give_up(self, attempts: u32) -> Self;
}

impl Transient for UpstreamError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Retryable { retry_after, .. } => *retry_after,
            UpstreamError::Fatal { .. } => None,
        }
    }

    fn give_up(self, attempts: u32) -> Self {
        match self {
            UpstreamError::Retryable {
                service, message, ..
            } => UpstreamError::Fatal {
                service,
                message: format!("gave up after {attempts} attempts: {message}"),
            },
            fatal => fatal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failure number `failures` (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.8..=1.2);
            // Scaling a delay near Duration::MAX overflows; fall back to the cap.
            Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
                .unwrap_or(self.max_delay)
                .min(self.max_delay)
        } else {
            delay
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt budget is used up.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() => {
                if attempt >= max_attempts {
                    warn!(label, attempt, %error, "retry budget exhausted");
                    return Err(error.give_up(attempt));
                }

                let delay = error
                    .retry_after()
                    .map(|hint| hint.min(policy.max_delay))
                    .unwrap_or_else(|| policy.backoff(attempt));
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Parse the `Retry-After: <seconds>` form of the header.
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        return input.to_string();
    }
    let mut truncated: String = input.chars().take(limit).collect();
    truncated.push('…');
    truncated
}
