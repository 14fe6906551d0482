//! Retry policy: per-category budgets, exponential backoff with jitter,
//! and `Retry-After` handling.
//!
//! A `Retry` doubles as configuration and live state: the session clones
//! the configured template at the start of each request lifecycle and
//! mutates the clone as attempts fail. The backoff counter resets whenever
//! a redirect is successfully followed, so a chain of redirects does not
//! inherit the penalty of earlier errors.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use http::Method;
use rand::Rng;

use crate::error::{Error, Result};
use crate::fields::Headers;

const DEFAULT_RETRYABLE_METHODS: [Method; 6] = [
    Method::HEAD,
    Method::GET,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

/// Statuses retried regardless of method (the server explicitly asked).
const DEFAULT_RETRYABLE_STATUSES: [u16; 3] = [413, 429, 503];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryCategory {
    Connect,
    Read,
    Response,
}

#[derive(Debug, Clone)]
pub struct Retry {
    total: Option<i64>,
    connect: Option<i64>,
    read: Option<i64>,
    response: Option<i64>,
    retryable_methods: HashSet<Method>,
    retryable_status_codes: HashSet<u16>,
    max_retry_after: Option<Duration>,
    backoff_factor: f64,
    backoff_jitter: f64,
    max_backoff: Option<Duration>,
    backoff_counter: u32,
}

impl Default for Retry {
    fn default() -> Self {
        Retry::new(3)
    }
}

impl Retry {
    pub fn new(total: u32) -> Retry {
        Retry {
            total: Some(total as i64),
            connect: None,
            read: None,
            response: None,
            retryable_methods: DEFAULT_RETRYABLE_METHODS.iter().cloned().collect(),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUSES.iter().copied().collect(),
            max_retry_after: Some(Duration::from_secs(30)),
            backoff_factor: 0.0,
            backoff_jitter: 0.0,
            max_backoff: None,
            backoff_counter: 0,
        }
    }

    /// No retries at all.
    pub fn none() -> Retry {
        Retry::new(0)
    }

    pub fn connect(mut self, n: u32) -> Retry {
        self.connect = Some(n as i64);
        self
    }

    pub fn read(mut self, n: u32) -> Retry {
        self.read = Some(n as i64);
        self
    }

    pub fn response(mut self, n: u32) -> Retry {
        self.response = Some(n as i64);
        self
    }

    pub fn retryable_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Retry {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    pub fn retryable_status_codes(mut self, statuses: impl IntoIterator<Item = u16>) -> Retry {
        self.retryable_status_codes = statuses.into_iter().collect();
        self
    }

    pub fn max_retry_after(mut self, limit: Duration) -> Retry {
        self.max_retry_after = Some(limit);
        self
    }

    /// Exponential backoff: `factor × 2^(attempt−1)`, jittered.
    pub fn backoff(mut self, factor: f64, jitter: f64, max: Duration) -> Retry {
        self.backoff_factor = factor;
        self.backoff_jitter = jitter.clamp(0.0, 1.0);
        self.max_backoff = Some(max);
        self
    }

    pub(crate) fn method_is_retryable(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    pub(crate) fn status_is_retryable(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Seconds to wait before the next attempt: the larger of the backoff
    /// delay and the response's `Retry-After`.
    pub fn delay_before_next_request(&self, response_headers: Option<&Headers>) -> Duration {
        let mut delay = self.backoff_delay();
        if let Some(headers) = response_headers {
            delay = delay.max(self.retry_after_delay(headers));
        }
        delay
    }

    fn backoff_delay(&self) -> Duration {
        let Some(max_backoff) = self.max_backoff else {
            return Duration::ZERO;
        };
        if self.backoff_factor <= 0.0 || self.backoff_counter == 0 {
            return Duration::ZERO;
        }
        let jitter_factor = if self.backoff_jitter > 0.0 {
            (1.0 - self.backoff_jitter) + rand::thread_rng().gen_range(0.0..self.backoff_jitter)
        } else {
            1.0
        };
        let exponent = (self.backoff_counter - 1).min(32);
        let backoff = self.backoff_factor * f64::powi(2.0, exponent as i32) * jitter_factor;
        Duration::from_secs_f64(backoff).min(max_backoff)
    }

    fn retry_after_delay(&self, headers: &Headers) -> Duration {
        let Some(raw) = headers.get_one("retry-after") else {
            return Duration::ZERO;
        };
        let delay = if let Ok(seconds) = raw.trim().parse::<u64>() {
            Duration::from_secs(seconds)
        } else if let Ok(at) = httpdate::parse_http_date(raw.trim()) {
            at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };
        match self.max_retry_after {
            Some(limit) => delay.min(limit),
            None => delay,
        }
    }

    /// Consumes one retry from `category` (and from the total budget).
    /// Errors with `TooManyRetries` once any affected counter goes
    /// negative.
    pub(crate) fn increment(&mut self, category: RetryCategory, reason: &str) -> Result<()> {
        self.backoff_counter += 1;
        if let Some(total) = self.total.as_mut() {
            *total -= 1;
        }
        let counter = match category {
            RetryCategory::Connect => self.connect.as_mut(),
            RetryCategory::Read => self.read.as_mut(),
            RetryCategory::Response => self.response.as_mut(),
        };
        if let Some(counter) = counter {
            *counter -= 1;
        }
        let exhausted = self.total.is_some_and(|t| t < 0)
            || self.connect.is_some_and(|c| c < 0)
            || self.read.is_some_and(|r| r < 0)
            || self.response.is_some_and(|r| r < 0);
        if exhausted {
            Err(Error::TooManyRetries(reason.to_string()))
        } else {
            Ok(())
        }
    }

    /// Called after a redirect is followed: consecutive-failure backoff
    /// starts over.
    pub(crate) fn reset_backoff_counter(&mut self) {
        self.backoff_counter = 0;
    }
}
