//! Retry/backoff policy for poll sessions
//!
//! Decides, per failure kind, whether a poll loop should wait and retry the
//! same round or abort and surface the error. The only failure retried inside
//! a poll is rate limiting (HTTP 429), which gets an exponentially growing,
//! capped delay; every other failure is assumed non-transient and propagates
//! immediately.

use crate::error::Error;
use std::time::Duration;

/// Trait for errors that can be classified as transient or not
///
/// Used outside poll loops for caller-driven resubmission decisions: a
/// transient failure (rate limit, connection timeout) is worth calling
/// `start()` again for; a permanent one (validation, authentication) is not.
pub trait IsTransient {
    /// Returns true if the error is transient and worth a fresh attempt
    fn is_transient(&self) -> bool;
}

impl IsTransient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            // Connection-level glitches are transient; HTTP-level errors are not
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout(_) => true,
            // Everything else needs a changed input or changed backend state
            Error::Validation { .. }
            | Error::Auth { .. }
            | Error::NotFound(_)
            | Error::Api { .. }
            | Error::TaskFailed { .. }
            | Error::MalformedResponse { .. }
            | Error::InvalidState { .. }
            | Error::Cancelled
            | Error::NotSupported(_)
            | Error::Serialization(_)
            | Error::Config { .. } => false,
        }
    }
}

/// Exponential backoff schedule for rate-limited rounds
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// First delay in the schedule
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
    /// Growth factor between consecutive rounds
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Policy with the conventional doubling schedule
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            multiplier: 2.0,
        }
    }

    /// Delay for the given zero-based rate-limit round:
    /// `min(base * multiplier^round, cap)`
    ///
    /// Strictly increasing across consecutive rounds until the cap is reached.
    pub fn delay_for(&self, round: u32) -> Duration {
        let factor = self.multiplier.powi(round.min(63) as i32);
        // Cap before constructing the Duration: the uncapped product can
        // exceed what Duration::from_secs_f64 accepts
        let secs = (self.base.as_secs_f64() * factor).min(self.cap.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// What a poll loop should do about a status-fetch failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then retry the same round (does not count as an attempt)
    RetryAfter(Duration),
    /// Surface the error; the session is over
    Abort,
}

/// Classify a status-fetch failure against the policy
///
/// `round` is the number of consecutive rate-limited responses already seen in
/// this streak; it resets on any successful fetch.
pub fn decide(error: &Error, policy: &BackoffPolicy, round: u32) -> RetryDecision {
    if error.is_rate_limited() {
        let delay = policy.delay_for(round);
        tracing::warn!(
            round,
            delay_ms = delay.as_millis() as u64,
            "Rate limited during poll, backing off"
        );
        RetryDecision::RetryAfter(delay)
    } else {
        RetryDecision::Abort
    }
}
