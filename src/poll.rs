//! Generic task polling loop
//!
//! One poller serves all four features, parameterized by a status-fetch
//! function; feature quirks (endpoints, field names, extra states) live in
//! the feature modules, not here. The loop queries status at a fixed
//! interval until a terminal state, an attempt ceiling, or a wall-clock
//! ceiling, reporting progress and status transitions through a pair of
//! caller-supplied callbacks.
//!
//! Waiting is cooperative: every sleep races the session's cancellation
//! token, so a cancelled session stops scheduling checks immediately and the
//! result of any check already in flight is discarded on return.

use crate::backoff::{BackoffPolicy, RetryDecision, decide};
use crate::config::PollConfig;
use crate::error::{Error, Result, SubError, TimeoutKind};
use crate::types::{StatusSnapshot, TaskStatus};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The two callbacks a poll session reports through
///
/// Exactly two event kinds exist, so this stays an explicit callback pair
/// rather than a general event emitter.
#[derive(Default)]
pub struct PollHooks {
    pub(crate) on_progress: Option<Box<dyn FnMut(f64) + Send>>,
    pub(crate) on_status_change: Option<Box<dyn FnMut(&TaskStatus) + Send>>,
}

impl PollHooks {
    /// Hooks that report nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Invoke `f` with each 0-100 percentage, in the order the status fetches
    /// returned them; never invoked for an absent progress figure
    pub fn on_progress(mut self, f: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Invoke `f` once per observed status transition
    pub fn on_status_change(mut self, f: impl FnMut(&TaskStatus) + Send + 'static) -> Self {
        self.on_status_change = Some(Box::new(f));
        self
    }
}

/// Client-side bookkeeping for one task's poll lifecycle
///
/// Created by the lifecycle coordinator when submission returns an id,
/// mutated only by the poller, and discarded the moment a terminal condition
/// is observed.
#[derive(Debug)]
pub struct PollSession {
    /// Genuine status-check rounds completed (rate-limited rounds excluded)
    pub attempts: u32,
    /// Consecutive rate-limited responses in the current streak
    pub rate_limit_round: u32,
    /// When the session started
    pub started: tokio::time::Instant,
    /// Last status observed, for transition detection
    pub last_status: Option<TaskStatus>,
    /// Last percentage reported through the progress callback
    pub last_percent: Option<f64>,
}

impl PollSession {
    /// Fresh session starting now
    pub fn new() -> Self {
        Self {
            attempts: 0,
            rate_limit_round: 0,
            started: tokio::time::Instant::now(),
            last_status: None,
            last_percent: None,
        }
    }
}

impl Default for PollSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll a task to a terminal state
///
/// `status_fn` performs one status fetch. The loop:
/// - aborts with [`Error::Timeout`] (`WallClock`) once `max_wall_clock` has
///   elapsed, regardless of attempts;
/// - retries rate-limited fetches after an exponentially growing, capped
///   delay without counting them against `max_attempts`;
/// - propagates every other fetch failure immediately (a 404 means the task
///   id is unknown server-side and is terminal, not retryable);
/// - fires `on_status_change` once per transition and `on_progress` for each
///   interpretable figure, before terminal handling, so a terminal response
///   still reports its final progress;
/// - returns the terminal snapshot on `completed`, raises
///   [`Error::TaskFailed`] on `failed`, and treats unrecognized status
///   strings as non-terminal;
/// - aborts with [`Error::Timeout`] (`Attempts`) once `max_attempts` genuine
///   rounds have completed.
///
/// After a terminal response is observed, no further status fetches occur.
pub async fn poll_task<F, Fut>(
    mut status_fn: F,
    config: &PollConfig,
    session: &mut PollSession,
    mut hooks: PollHooks,
    cancel: &CancellationToken,
) -> Result<StatusSnapshot>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<StatusSnapshot>>,
{
    let policy = BackoffPolicy::new(config.base_interval, config.backoff_cap);

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if session.started.elapsed() >= config.max_wall_clock {
            tracing::warn!(
                elapsed_secs = session.started.elapsed().as_secs(),
                "Poll session exceeded wall-clock ceiling"
            );
            return Err(Error::Timeout(TimeoutKind::WallClock));
        }

        let snapshot = match status_fn().await {
            Ok(snapshot) => {
                session.rate_limit_round = 0;
                snapshot
            }
            Err(e) => match decide(&e, &policy, session.rate_limit_round) {
                RetryDecision::RetryAfter(delay) => {
                    // Rate-limited rounds do not count against max_attempts
                    session.rate_limit_round += 1;
                    wait(delay, cancel).await?;
                    continue;
                }
                RetryDecision::Abort => return Err(e),
            },
        };

        // A check already in flight when cancel() was called settles here;
        // its result is discarded
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if session.last_status.as_ref() != Some(&snapshot.status) {
            if let TaskStatus::Unknown(raw) = &snapshot.status {
                tracing::warn!(status = %raw, "Unrecognized task status, treating as non-terminal");
            } else if let Some(prev) =
                session.last_status.as_ref().filter(|prev| !prev.can_transition_to(&snapshot.status))
            {
                // The lifecycle is forward-only; a regression is a service bug
                // worth surfacing but not worth aborting over
                tracing::warn!(from = %prev, to = %snapshot.status, "Backwards status transition");
            } else {
                tracing::debug!(status = %snapshot.status, "Task status changed");
            }
            if let Some(on_status_change) = hooks.on_status_change.as_mut() {
                on_status_change(&snapshot.status);
            }
            session.last_status = Some(snapshot.status.clone());
        }

        if let Some(percent) = snapshot.progress.as_ref().and_then(|p| p.percent()) {
            if let Some(on_progress) = hooks.on_progress.as_mut() {
                on_progress(percent);
            }
            session.last_percent = Some(percent);
        }

        match &snapshot.status {
            TaskStatus::Completed => return Ok(snapshot),
            TaskStatus::Failed => {
                let message = snapshot
                    .detail
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string());
                return Err(Error::TaskFailed {
                    message,
                    sub_errors: sub_errors_from(&snapshot.payload),
                });
            }
            _ => {}
        }

        session.attempts += 1;
        if session.attempts >= config.max_attempts {
            tracing::warn!(
                attempts = session.attempts,
                "Poll session exceeded attempt ceiling"
            );
            return Err(Error::Timeout(TimeoutKind::Attempts));
        }

        // Fixed interval for the steady-state non-rate-limited case
        wait(config.base_interval, cancel).await?;
    }
}

/// Sleep that loses to cancellation
async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Best-effort extraction of structured sub-errors from a failed payload
fn sub_errors_from(payload: &serde_json::Value) -> Vec<SubError> {
    payload
        .get("errors")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Progress;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn snapshot(status: TaskStatus, progress: Option<Progress>) -> StatusSnapshot {
        StatusSnapshot {
            status,
            progress,
            detail: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Script of status-fetch outcomes consumed one per call
    struct Script {
        responses: Mutex<VecDeque<Result<StatusSnapshot>>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(responses: Vec<Result<StatusSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn next(&self) -> Result<StatusSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot(TaskStatus::Processing, None)))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn config() -> PollConfig {
        PollConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reports_each_transition_once_and_final_progress() {
        let script = Script::new(vec![
            Ok(snapshot(TaskStatus::Pending, None)),
            Ok(snapshot(
                TaskStatus::Processing,
                Some(Progress::Ratio {
                    completed: 2,
                    total: 10,
                }),
            )),
            Ok(snapshot(
                TaskStatus::Processing,
                Some(Progress::Ratio {
                    completed: 10,
                    total: 10,
                }),
            )),
            Ok(snapshot(
                TaskStatus::Completed,
                Some(Progress::Ratio {
                    completed: 10,
                    total: 10,
                }),
            )),
        ]);

        let transitions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let percents: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let hooks = PollHooks::none()
            .on_status_change({
                let transitions = transitions.clone();
                move |s| transitions.lock().unwrap().push(s.to_string())
            })
            .on_progress({
                let percents = percents.clone();
                move |p| percents.lock().unwrap().push(p)
            });

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let script_ref = script.clone();
        let terminal = poll_task(
            || {
                let s = script_ref.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            hooks,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(terminal.status, TaskStatus::Completed);
        assert_eq!(
            *transitions.lock().unwrap(),
            vec!["pending", "processing", "completed"],
            "exactly one callback per distinct status"
        );
        assert_eq!(*percents.lock().unwrap(), vec![20.0, 100.0, 100.0]);
        assert_eq!(script.calls(), 4, "no fetches after the terminal response");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_progress_is_never_reported_as_zero() {
        let script = Script::new(vec![
            Ok(snapshot(TaskStatus::Processing, None)),
            Ok(snapshot(TaskStatus::Completed, None)),
        ]);
        let reported = Arc::new(AtomicU32::new(0));
        let hooks = PollHooks::none().on_progress({
            let reported = reported.clone();
            move |_| {
                reported.fetch_add(1, Ordering::SeqCst);
            }
        });

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            hooks,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(reported.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_raises_task_failed_with_detail() {
        let script = Script::new(vec![Ok(StatusSnapshot {
            status: TaskStatus::Failed,
            progress: None,
            detail: Some("worker crashed".to_string()),
            payload: json!({"errors": [{"query": "q1", "message": "provider timeout"}]}),
        })]);

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        match err {
            Error::TaskFailed {
                message,
                sub_errors,
            } => {
                assert_eq!(message, "worker crashed");
                assert_eq!(sub_errors.len(), 1);
                assert_eq!(sub_errors[0].query, "q1");
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_aborts_with_attempts_timeout() {
        let script = Script::new(vec![]); // falls through to endless processing
        let config = PollConfig {
            max_attempts: 3,
            ..PollConfig::default()
        };

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config,
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(TimeoutKind::Attempts)));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_ceiling_aborts_independently_of_attempts() {
        let script = Script::new(vec![]);
        let config = PollConfig {
            max_attempts: 1_000_000,
            base_interval: Duration::from_secs(2),
            max_wall_clock: Duration::from_secs(7),
            ..PollConfig::default()
        };

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config,
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(TimeoutKind::WallClock)));
        let calls = script.calls();
        assert!(
            (3..=4).contains(&calls),
            "about 4 checks fit in 7s at 2s intervals, got {calls}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_rounds_back_off_and_do_not_count() {
        let rate_limited = || {
            Err(Error::RateLimited {
                message: "slow down".to_string(),
            })
        };
        let script = Script::new(vec![
            rate_limited(),
            rate_limited(),
            Ok(snapshot(TaskStatus::Processing, None)),
            Ok(snapshot(TaskStatus::Completed, None)),
        ]);
        // Two genuine rounds fit under this ceiling only because 429 rounds
        // are not counted
        let config = PollConfig {
            max_attempts: 2,
            base_interval: Duration::from_secs(2),
            ..PollConfig::default()
        };

        let fetch_times: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let times = fetch_times.clone();
        let terminal = poll_task(
            || {
                let s = script.clone();
                let times = times.clone();
                async move {
                    times.lock().unwrap().push(tokio::time::Instant::now());
                    s.next()
                }
            },
            &config,
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(terminal.status, TaskStatus::Completed);
        assert_eq!(script.calls(), 4);

        // Consecutive rate-limited delays strictly increase: 2s then 4s
        let times = fetch_times.lock().unwrap();
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        assert_eq!(gap1, Duration::from_secs(2));
        assert_eq!(gap2, Duration::from_secs(4));
        assert!(gap2 > gap1, "backoff must grow across consecutive 429s");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_round_resets_after_a_successful_fetch() {
        let rate_limited = || {
            Err(Error::RateLimited {
                message: "slow down".to_string(),
            })
        };
        let script = Script::new(vec![
            rate_limited(),
            Ok(snapshot(TaskStatus::Processing, None)),
            rate_limited(),
            Ok(snapshot(TaskStatus::Completed, None)),
        ]);
        let config = PollConfig {
            base_interval: Duration::from_secs(2),
            ..PollConfig::default()
        };

        let fetch_times: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let times = fetch_times.clone();
        poll_task(
            || {
                let s = script.clone();
                let times = times.clone();
                async move {
                    times.lock().unwrap().push(tokio::time::Instant::now());
                    s.next()
                }
            },
            &config,
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap();

        let times = fetch_times.lock().unwrap();
        // First 429 backs off base*2^0 = 2s; the streak then resets, so the
        // second 429 also backs off 2s rather than 4s
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[3] - times[2], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_transport_error_propagates_immediately() {
        let script = Script::new(vec![Err(Error::Api {
            status: 500,
            message: "boom".to_string(),
        })]);

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(script.calls(), 1, "no silent retry");
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_terminal_not_retryable() {
        let script = Script::new(vec![Err(Error::NotFound("task 9".to_string()))]);

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_is_non_terminal_and_does_not_crash() {
        let script = Script::new(vec![
            Ok(snapshot(
                TaskStatus::Unknown("recalibrating".to_string()),
                None,
            )),
            Ok(snapshot(TaskStatus::Completed, None)),
        ]);

        let transitions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let hooks = PollHooks::none().on_status_change({
            let transitions = transitions.clone();
            move |s| transitions.lock().unwrap().push(s.to_string())
        });

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        let terminal = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            hooks,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(terminal.status, TaskStatus::Completed);
        assert_eq!(
            *transitions.lock().unwrap(),
            vec!["recalibrating", "completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_session_makes_no_fetches() {
        let script = Script::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_in_flight_fetch_discards_its_result() {
        let script = Script::new(vec![Ok(snapshot(TaskStatus::Completed, None))]);
        let cancel = CancellationToken::new();
        let cancel_inside = cancel.clone();

        let reported = Arc::new(AtomicU32::new(0));
        let hooks = PollHooks::none().on_status_change({
            let reported = reported.clone();
            move |_| {
                reported.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut session = PollSession::new();
        let err = poll_task(
            || {
                let s = script.clone();
                // Cancellation lands while the fetch is in flight
                cancel_inside.cancel();
                async move { s.next() }
            },
            &config(),
            &mut session,
            hooks,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(script.calls(), 1);
        assert_eq!(
            reported.load(Ordering::SeqCst),
            0,
            "callbacks are suppressed for a check already in flight"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_tracks_attempts_and_last_status() {
        let script = Script::new(vec![
            Ok(snapshot(TaskStatus::Processing, Some(Progress::Percent(40.0)))),
            Ok(snapshot(TaskStatus::Completed, None)),
        ]);

        let cancel = CancellationToken::new();
        let mut session = PollSession::new();
        poll_task(
            || {
                let s = script.clone();
                async move { s.next() }
            },
            &config(),
            &mut session,
            PollHooks::none(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(session.attempts, 1, "terminal round is not counted");
        assert_eq!(session.last_status, Some(TaskStatus::Completed));
        assert_eq!(session.last_percent, Some(40.0));
    }
}
