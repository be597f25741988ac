//! Task lifecycle coordination
//!
//! A [`TaskCoordinator`] drives one feature's submit/poll/normalize
//! lifecycle and enforces the phase machine around it: one active run at a
//! time, cooperative cancellation from any other handle, and retry only from
//! a failed run. Handles are cheap to clone and share the same underlying
//! state, so a UI can hold one clone for `cancel()` while another awaits
//! `start()`.

use crate::config::{ClientConfig, PollConfig};
use crate::error::{Error, Result};
use crate::features::Feature;
use crate::poll::{PollHooks, PollSession, poll_task};
use crate::transport::Transport;
use crate::types::{TaskId, TaskStatus};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Where a coordinator is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No run started yet
    Idle,
    /// Submission request in flight
    Submitting,
    /// Task accepted, status polling in progress
    Polling,
    /// Terminal: normalized result available
    Completed,
    /// Terminal until `retry`: the run failed, possibly with a partial result
    Failed,
    /// Terminal until `start`: the run was cancelled client-side
    Cancelled,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Submitting => "submitting",
            Phase::Polling => "polling",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner<O> {
    phase: Phase,
    task_id: Option<TaskId>,
    last_status: Option<TaskStatus>,
    last_percent: Option<f64>,
    output: Option<O>,
    cancel: CancellationToken,
}

/// Lifecycle coordinator for one feature
///
/// The mutex guards short bookkeeping sections only and is never held across
/// an await point.
pub struct TaskCoordinator<F: Feature> {
    feature: F,
    transport: Transport,
    poll_config: PollConfig,
    inner: Arc<Mutex<Inner<F::Output>>>,
}

impl<F: Feature + Clone> Clone for TaskCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            feature: self.feature.clone(),
            transport: self.transport.clone(),
            poll_config: self.poll_config.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock_inner<O>(inner: &Mutex<Inner<O>>) -> MutexGuard<'_, Inner<O>> {
    // Poisoning here means a progress callback panicked; the bookkeeping
    // fields are plain data and remain valid
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<F: Feature> TaskCoordinator<F> {
    /// Coordinator with the feature's poll tuning resolved from `config`
    pub fn new(feature: F, transport: Transport, config: &ClientConfig) -> Self {
        let poll_config = config.poll_config_for(feature.kind());
        Self::with_poll_config(feature, transport, poll_config)
    }

    /// Coordinator with explicit poll tuning
    pub fn with_poll_config(feature: F, transport: Transport, poll_config: PollConfig) -> Self {
        Self {
            feature,
            transport,
            poll_config,
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                task_id: None,
                last_status: None,
                last_percent: None,
                output: None,
                cancel: CancellationToken::new(),
            })),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        lock_inner(&self.inner).phase
    }

    /// Id of the current or most recent run's task, once assigned
    pub fn task_id(&self) -> Option<TaskId> {
        lock_inner(&self.inner).task_id.clone()
    }

    /// Last remote status observed by the poller
    pub fn last_status(&self) -> Option<TaskStatus> {
        lock_inner(&self.inner).last_status.clone()
    }

    /// Last 0-100 progress figure observed by the poller
    pub fn last_percent(&self) -> Option<f64> {
        lock_inner(&self.inner).last_percent
    }

    /// The retained result, if a run has produced one
    ///
    /// Present after completion, and after a partial failure where a usable
    /// partial result was normalized.
    pub fn output(&self) -> Option<F::Output> {
        lock_inner(&self.inner).output.clone()
    }

    /// Submit a new task and drive it to a terminal state
    ///
    /// Refuses with [`Error::InvalidState`] while another run is submitting
    /// or polling; a run in any terminal phase is replaced. Returns the
    /// normalized result, or [`Error::TaskFailed`] carrying sub-errors when
    /// the run completed only partially (the partial result stays retained
    /// for [`Self::retry`]).
    pub async fn start(&self, params: &F::Params, hooks: PollHooks) -> Result<F::Output> {
        let cancel = {
            let mut inner = lock_inner(&self.inner);
            if matches!(inner.phase, Phase::Submitting | Phase::Polling) {
                return Err(Error::InvalidState {
                    operation: "start".to_string(),
                    current: inner.phase.to_string(),
                });
            }
            let cancel = CancellationToken::new();
            inner.phase = Phase::Submitting;
            inner.task_id = None;
            inner.last_status = None;
            inner.last_percent = None;
            inner.output = None;
            inner.cancel = cancel.clone();
            cancel
        };

        let handle = match self.feature.submit(&self.transport, params).await {
            Ok(handle) => handle,
            Err(e) => {
                self.settle(&e);
                return Err(e);
            }
        };
        // cancel() during submission wins over the accepted handle
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        {
            let mut inner = lock_inner(&self.inner);
            inner.task_id = Some(handle.id.clone());
            inner.last_status = Some(handle.status.clone());
            inner.phase = Phase::Polling;
        }
        tracing::info!(kind = %self.feature.kind(), task_id = %handle.id, "Task accepted, polling");

        self.run_to_result(&handle.id, None, hooks, &cancel).await
    }

    /// Cancel the in-flight run
    ///
    /// Idempotent once cancelled; refuses when there is nothing to cancel
    /// (idle or already settled).
    pub fn cancel(&self) -> Result<()> {
        let mut inner = lock_inner(&self.inner);
        match inner.phase {
            Phase::Submitting | Phase::Polling => {
                tracing::info!(task_id = ?inner.task_id, "Cancelling task run");
                inner.cancel.cancel();
                inner.phase = Phase::Cancelled;
                Ok(())
            }
            Phase::Cancelled => Ok(()),
            phase @ (Phase::Idle | Phase::Completed | Phase::Failed) => Err(Error::InvalidState {
                operation: "cancel".to_string(),
                current: phase.to_string(),
            }),
        }
    }

    /// Re-queue the failed portion of the last run and poll it to a terminal
    /// state, merging the fresh output into the retained partial result
    ///
    /// Only valid from [`Phase::Failed`] with an assigned task id; features
    /// without partial retry refuse with [`Error::NotSupported`].
    pub async fn retry(&self, hooks: PollHooks) -> Result<F::Output> {
        let (id, previous, cancel) = {
            let mut inner = lock_inner(&self.inner);
            if inner.phase != Phase::Failed {
                return Err(Error::InvalidState {
                    operation: "retry".to_string(),
                    current: inner.phase.to_string(),
                });
            }
            let Some(id) = inner.task_id.clone() else {
                return Err(Error::InvalidState {
                    operation: "retry".to_string(),
                    current: "failed before a task id was assigned".to_string(),
                });
            };
            let cancel = CancellationToken::new();
            inner.phase = Phase::Submitting;
            inner.cancel = cancel.clone();
            (id, inner.output.clone(), cancel)
        };

        let receipt = match self.feature.retry(&self.transport, &id).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.settle(&e);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        lock_inner(&self.inner).phase = Phase::Polling;
        tracing::info!(
            task_id = %id,
            missing = receipt.missing_count,
            "Retry accepted, polling"
        );

        self.run_to_result(&id, previous, hooks, &cancel).await
    }

    async fn run_to_result(
        &self,
        id: &TaskId,
        previous: Option<F::Output>,
        hooks: PollHooks,
        cancel: &CancellationToken,
    ) -> Result<F::Output> {
        let mut session = PollSession::new();
        let hooks = self.instrumented(hooks);

        let terminal = match poll_task(
            || self.feature.fetch_status(&self.transport, id),
            &self.poll_config,
            &mut session,
            hooks,
            cancel,
        )
        .await
        {
            Ok(terminal) => terminal,
            Err(e) => {
                self.settle(&e);
                return Err(e);
            }
        };

        let fresh = match self.feature.fetch_result(&self.transport, id, &terminal).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.settle(&e);
                return Err(e);
            }
        };

        let merged = self.feature.merge_outputs(previous, fresh);
        let failures = self.feature.partial_failures(&merged);
        let mut inner = lock_inner(&self.inner);
        inner.output = Some(merged.clone());
        if failures.is_empty() {
            inner.phase = Phase::Completed;
            Ok(merged)
        } else {
            inner.phase = Phase::Failed;
            drop(inner);
            tracing::warn!(
                task_id = %id,
                failed = failures.len(),
                "Task completed with partial failures"
            );
            Err(Error::TaskFailed {
                message: format!("{} sub-queries failed", failures.len()),
                sub_errors: failures,
            })
        }
    }

    /// Wrap the caller's hooks so observed status and progress also land in
    /// the shared bookkeeping state
    fn instrumented(&self, user: PollHooks) -> PollHooks {
        let PollHooks {
            on_progress: mut user_progress,
            on_status_change: mut user_status,
        } = user;
        let progress_state = Arc::clone(&self.inner);
        let status_state = Arc::clone(&self.inner);
        PollHooks::none()
            .on_progress(move |percent| {
                lock_inner(&progress_state).last_percent = Some(percent);
                if let Some(f) = user_progress.as_mut() {
                    f(percent);
                }
            })
            .on_status_change(move |status| {
                lock_inner(&status_state).last_status = Some(status.clone());
                if let Some(f) = user_status.as_mut() {
                    f(status);
                }
            })
    }

    /// Record a terminal phase for a run that ended in an error
    ///
    /// A phase already set to `Cancelled` by [`Self::cancel`] is preserved
    /// even when the settling error is not `Cancelled`.
    fn settle(&self, error: &Error) {
        let mut inner = lock_inner(&self.inner);
        if inner.phase == Phase::Cancelled {
            return;
        }
        inner.phase = match error {
            Error::Cancelled => Phase::Cancelled,
            _ => Phase::Failed,
        };
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubError;
    use crate::transport::NoCredentials;
    use crate::types::{Progress, RetryReceipt, StatusSnapshot, TaskHandle, TaskKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct FakeOutput {
        items: Vec<String>,
        failed: Vec<SubError>,
    }

    #[derive(Default)]
    struct FakeState {
        fail_submit: bool,
        allow_retry: bool,
        statuses: VecDeque<StatusSnapshot>,
        results: VecDeque<FakeOutput>,
        submits: u32,
        retries: u32,
    }

    #[derive(Clone, Default)]
    struct FakeFeature {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeFeature {
        fn with_state(f: impl FnOnce(&mut FakeState)) -> Self {
            let feature = Self::default();
            f(&mut feature.state.lock().unwrap());
            feature
        }

        fn push_run(&self, statuses: &[&str], result: FakeOutput) {
            let mut state = self.state.lock().unwrap();
            for raw in statuses {
                state.statuses.push_back(snapshot(raw));
            }
            state.results.push_back(result);
        }
    }

    fn snapshot(raw: &str) -> StatusSnapshot {
        StatusSnapshot {
            status: TaskStatus::parse(raw),
            progress: Some(Progress::Percent(50.0)),
            detail: None,
            payload: serde_json::Value::Null,
        }
    }

    #[async_trait]
    impl Feature for FakeFeature {
        type Params = ();
        type Output = FakeOutput;

        fn kind(&self) -> TaskKind {
            TaskKind::CitationAnalysis
        }

        async fn submit(&self, _: &Transport, _: &Self::Params) -> Result<TaskHandle> {
            let mut state = self.state.lock().unwrap();
            if state.fail_submit {
                return Err(Error::Validation {
                    message: "url is required".to_string(),
                });
            }
            state.submits += 1;
            Ok(TaskHandle {
                id: TaskId::Int(1),
                status: TaskStatus::Pending,
            })
        }

        async fn fetch_status(&self, _: &Transport, _: &TaskId) -> Result<StatusSnapshot> {
            let mut state = self.state.lock().unwrap();
            // An exhausted script keeps the task in flight
            Ok(state
                .statuses
                .pop_front()
                .unwrap_or_else(|| snapshot("processing")))
        }

        async fn fetch_result(
            &self,
            _: &Transport,
            _: &TaskId,
            _: &StatusSnapshot,
        ) -> Result<Self::Output> {
            let mut state = self.state.lock().unwrap();
            Ok(state.results.pop_front().unwrap_or_default())
        }

        async fn retry(&self, _: &Transport, id: &TaskId) -> Result<RetryReceipt> {
            let mut state = self.state.lock().unwrap();
            if !state.allow_retry {
                return Err(Error::NotSupported("no partial retry".to_string()));
            }
            state.retries += 1;
            Ok(RetryReceipt {
                task_id: id.clone(),
                missing_count: 1,
            })
        }

        fn partial_failures(&self, output: &Self::Output) -> Vec<SubError> {
            output.failed.clone()
        }

        fn merge_outputs(
            &self,
            previous: Option<Self::Output>,
            fresh: Self::Output,
        ) -> Self::Output {
            let mut merged = previous.unwrap_or_default();
            merged.items.extend(fresh.items);
            merged.failed = fresh.failed;
            merged
        }
    }

    fn coordinator(feature: FakeFeature) -> TaskCoordinator<FakeFeature> {
        let config = ClientConfig::new("http://127.0.0.1:9");
        let transport = Transport::new(&config, Arc::new(NoCredentials)).unwrap();
        let poll_config = PollConfig {
            max_attempts: 10,
            base_interval: Duration::from_millis(100),
            max_wall_clock: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(5),
        };
        TaskCoordinator::with_poll_config(feature, transport, poll_config)
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_to_completion() {
        let feature = FakeFeature::default();
        feature.push_run(
            &["pending", "processing", "completed"],
            FakeOutput {
                items: vec!["a".to_string()],
                failed: Vec::new(),
            },
        );
        let coordinator = coordinator(feature.clone());
        assert_eq!(coordinator.phase(), Phase::Idle);

        let output = coordinator.start(&(), PollHooks::none()).await.unwrap();
        assert_eq!(output.items, vec!["a".to_string()]);
        assert_eq!(coordinator.phase(), Phase::Completed);
        assert_eq!(coordinator.task_id(), Some(TaskId::Int(1)));
        assert_eq!(coordinator.last_status(), Some(TaskStatus::Completed));
        assert_eq!(coordinator.last_percent(), Some(50.0));
        assert_eq!(coordinator.output(), Some(output));
        assert_eq!(feature.state.lock().unwrap().submits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_refused_then_cancel_settles_once() {
        let coordinator = coordinator(FakeFeature::default());
        let racing = coordinator.clone();
        let run = tokio::spawn(async move { racing.start(&(), PollHooks::none()).await });

        while coordinator.phase() != Phase::Polling {
            tokio::task::yield_now().await;
        }

        let refused = coordinator.start(&(), PollHooks::none()).await.unwrap_err();
        assert!(matches!(refused, Error::InvalidState { .. }));

        coordinator.cancel().unwrap();
        let outcome = run.await.unwrap();
        assert!(matches!(outcome, Err(Error::Cancelled)));
        assert_eq!(coordinator.phase(), Phase::Cancelled);

        // Cancelling an already cancelled run is a no-op
        coordinator.cancel().unwrap();
        assert_eq!(coordinator.phase(), Phase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_refused_when_nothing_in_flight() {
        let coordinator = coordinator(FakeFeature::default());
        let err = coordinator.cancel().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_failure_lands_in_failed() {
        let coordinator = coordinator(FakeFeature::with_state(|s| s.fail_submit = true));
        let err = coordinator.start(&(), PollHooks::none()).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(coordinator.phase(), Phase::Failed);
        assert_eq!(coordinator.task_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_retains_result_and_retry_merges() {
        let feature = FakeFeature::with_state(|s| s.allow_retry = true);
        feature.push_run(
            &["completed"],
            FakeOutput {
                items: vec!["a".to_string()],
                failed: vec![SubError {
                    query: "q2".to_string(),
                    message: "provider timeout".to_string(),
                }],
            },
        );
        let coordinator = coordinator(feature.clone());

        let err = coordinator.start(&(), PollHooks::none()).await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed { ref sub_errors, .. } if sub_errors.len() == 1));
        assert_eq!(coordinator.phase(), Phase::Failed);
        let partial = coordinator.output().unwrap();
        assert_eq!(partial.items, vec!["a".to_string()]);

        feature.push_run(
            &["completed"],
            FakeOutput {
                items: vec!["b".to_string()],
                failed: Vec::new(),
            },
        );
        let merged = coordinator.retry(PollHooks::none()).await.unwrap();
        assert_eq!(merged.items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(coordinator.phase(), Phase::Completed);
        assert_eq!(feature.state.lock().unwrap().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_refused_outside_failed() {
        let coordinator = coordinator(FakeFeature::default());
        let err = coordinator.retry(PollHooks::none()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_retry_keeps_failed_phase() {
        let feature = FakeFeature::default();
        feature.push_run(
            &["completed"],
            FakeOutput {
                items: Vec::new(),
                failed: vec![SubError {
                    query: "q1".to_string(),
                    message: "boom".to_string(),
                }],
            },
        );
        let coordinator = coordinator(feature);
        coordinator.start(&(), PollHooks::none()).await.unwrap_err();
        assert_eq!(coordinator.phase(), Phase::Failed);

        let err = coordinator.retry(PollHooks::none()).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
        assert_eq!(coordinator.phase(), Phase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_observe_progress_and_transitions() {
        let feature = FakeFeature::default();
        feature.push_run(
            &["processing", "completed"],
            FakeOutput {
                items: vec!["a".to_string()],
                failed: Vec::new(),
            },
        );
        let coordinator = coordinator(feature);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_hook = Arc::clone(&seen);
        let hooks = PollHooks::none()
            .on_status_change(move |status| seen_in_hook.lock().unwrap().push(status.to_string()));
        coordinator.start(&(), hooks).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["processing", "completed"]);
        assert_eq!(coordinator.last_percent(), Some(50.0));
    }
}
