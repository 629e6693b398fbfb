use std::time::{Duration, SystemTime};

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, Response, StatusCode};
use tracing::warn;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Transport-level retry configuration handed to [`RetryingHttp`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_statuses: Vec<StatusCode>,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::new(DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX, false),
            retry_statuses: vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces the backoff base, keeping the default cap.
    pub fn with_backoff_factor(self, factor: Duration) -> Self {
        self.with_backoff(Backoff::new(factor, DEFAULT_BACKOFF_MAX, false))
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff.delay(attempt);
        match retry_after {
            Some(hint) if self.respect_retry_after => backoff.max(hint),
            _ => backoff,
        }
    }
}

/// Decorates a [`Client`] with the retry behaviour described by a [`RetryPolicy`].
///
/// Callers build requests with [`RetryingHttp::client`] and hand the built
/// request to [`RetryingHttp::execute`]. Once the retry budget is spent the last
/// response (or error) is returned unchanged, so status handling stays with the
/// caller.
#[derive(Clone)]
pub struct RetryingHttp {
    http: Client,
    policy: RetryPolicy,
}

impl RetryingHttp {
    pub fn new(http: Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    pub fn client(&self) -> &Client {
        &self.http
    }

    pub async fn execute(&self, request: Request) -> Result<Response, reqwest::Error> {
        let mut attempt = 0u32;
        let mut request = request;
        loop {
            // Streaming bodies cannot be cloned; those go out exactly once.
            let spare = if attempt < self.policy.max_retries {
                request.try_clone()
            } else {
                None
            };
            let Some(spare) = spare else {
                return self.http.execute(request).await;
            };

            match self.http.execute(request).await {
                Ok(response) if self.policy.should_retry_status(response.status()) => {
                    let delay = self.policy.delay_for(attempt, retry_after(&response));
                    warn!(
                        status = %response.status(),
                        url = %response.url(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    let delay = self.policy.delay_for(attempt, None);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }

            attempt += 1;
            request = spare;
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value.trim(), SystemTime::now())
}

fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}
