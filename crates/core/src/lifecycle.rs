use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::ConsoleConfig;
use crate::job::{JobApi, JobId, JobRequest, JobSnapshot, JobStatus, QueryJob, SubmitOutcome};
use crate::labels;
use crate::progress::{ProgressMode, ProgressReport, ProgressTracker};
use crate::result_table::ResultTable;
use crate::validation::{validate_query_target, ValidationError};
use crate::workspace::{TabId, Workspace, WorkspaceError, WorkspaceTab};

pub type TabEventReceiver = mpsc::UnboundedReceiver<TabEvent>;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Timers owned by one tab's running job. Dropping the handle stops them.
#[derive(Debug)]
pub struct PollHandle {
    token: CancellationToken,
    poll_task: JoinHandle<()>,
    ticker_task: JoinHandle<()>,
    started_at: Instant,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.token.cancel();
        self.poll_task.abort();
        self.ticker_task.abort();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleConfig {
    pub poll_interval: Duration,
    pub elapsed_tick: Duration,
    pub log_capacity: usize,
    pub progress_mode: ProgressMode,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            elapsed_tick: Duration::from_secs(1),
            log_capacity: 500,
            progress_mode: ProgressMode::Synthetic,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn from_console(config: &ConsoleConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            log_capacity: config.log_pane_capacity,
            progress_mode: config.progress_mode,
            ..Self::default()
        }
    }
}

/// One observation made by a [`StatusPoller`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Running {
        snapshot: JobSnapshot,
        report: ProgressReport,
    },
    Succeeded {
        snapshot: JobSnapshot,
        report: ProgressReport,
    },
    Failed {
        snapshot: JobSnapshot,
    },
    Unreachable {
        message: String,
    },
}

impl PollStep {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }
}

/// Polls one job at a fixed cadence. The first observation is made immediately and the
/// sequence ends after the first terminal step or once the token is cancelled.
pub struct StatusPoller<A: JobApi + ?Sized> {
    api: Arc<A>,
    job_id: JobId,
    token: CancellationToken,
    period: Duration,
    interval: Option<time::Interval>,
    tracker: ProgressTracker,
    finished: bool,
}

impl<A: JobApi + ?Sized> StatusPoller<A> {
    #[must_use]
    pub fn new(
        api: Arc<A>,
        job_id: JobId,
        token: CancellationToken,
        period: Duration,
        mode: ProgressMode,
    ) -> Self {
        Self {
            api,
            job_id,
            token,
            period: period.max(Duration::from_millis(1)),
            interval: None,
            tracker: ProgressTracker::new(mode),
            finished: false,
        }
    }

    pub async fn next_step(&mut self) -> Option<PollStep> {
        if self.finished || self.token.is_cancelled() {
            return None;
        }

        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
        if self.token.is_cancelled() {
            return None;
        }

        let fetched = self.api.fetch_job(&self.job_id).await;
        if self.token.is_cancelled() {
            return None;
        }

        let step = match fetched {
            Ok(snapshot) => match snapshot.status() {
                JobStatus::Succeeded => {
                    let report = self.tracker.complete(snapshot.server_progress());
                    PollStep::Succeeded { snapshot, report }
                }
                JobStatus::Failed => PollStep::Failed { snapshot },
                JobStatus::Submitted | JobStatus::Running => {
                    let report = self.tracker.advance(snapshot.server_progress());
                    PollStep::Running { snapshot, report }
                }
            },
            Err(error) => {
                tracing::warn!(job_id = %self.job_id, %error, "job status poll failed");
                PollStep::Unreachable {
                    message: error.user_message(),
                }
            }
        };
        self.finished = step.is_terminal();
        Some(step)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabEventKind {
    Poll(PollStep),
    Elapsed(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabEvent {
    pub tab_id: TabId,
    pub job_id: JobId,
    pub kind: TabEventKind,
}

/// What an accepted event did to its tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedEvent {
    Progressed,
    Ticked,
    Succeeded,
    Failed,
    Unreachable,
}

impl AppliedEvent {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Unreachable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("tab `{0}` already has a query in flight")]
    InFlight(TabId),
    #[error("query was rejected: {message}")]
    Rejected { message: String },
    #[error("user is not authorized to submit queries")]
    Unauthorized,
    #[error("query submission failed: {message}")]
    Server { message: String },
}

impl SubmitError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => error.user_message().to_string(),
            Self::Workspace(error) => error.to_string(),
            Self::InFlight(_) => labels::LOADING.to_string(),
            Self::Rejected { message } => format!("{}{message}", labels::SQL_SYNTAX_PREFIX),
            Self::Unauthorized => labels::UNAUTHORIZED.to_string(),
            Self::Server { .. } => labels::SERVER_UNREACHABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub tab_id: TabId,
    pub job_id: JobId,
}

/// Owns the tabs and drives each tab's job from submission to a terminal state.
pub struct QueryLifecycleController<A: JobApi + 'static> {
    workspace: Workspace,
    api: Arc<A>,
    config: LifecycleConfig,
    events: mpsc::UnboundedSender<TabEvent>,
}

impl<A: JobApi + 'static> QueryLifecycleController<A> {
    #[must_use]
    pub fn new(api: Arc<A>, config: LifecycleConfig) -> (Self, TabEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            workspace: Workspace::new(config.log_capacity),
            api,
            config,
            events,
        };
        (controller, receiver)
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    #[must_use]
    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    /// Validates and submits the query for `tab_id`, then starts polling it.
    /// Validation failures never reach the server.
    pub async fn submit(
        &mut self,
        tab_id: &TabId,
        app: Option<&str>,
        version: Option<&str>,
        sql: &str,
    ) -> Result<JobHandle, SubmitError> {
        let target = validate_query_target(app, version, sql)?;
        let tab = self
            .workspace
            .tab_mut(tab_id)
            .ok_or_else(|| WorkspaceError::UnknownTab(tab_id.clone()))?;
        if tab.in_flight {
            return Err(SubmitError::InFlight(tab_id.clone()));
        }
        tab.in_flight = true;
        tab.clear_notice();

        let request = JobRequest {
            app: target.app,
            version: target.version,
            db: String::new(),
            query: target.sql,
        };
        tracing::info!(tab = %tab_id, app = %request.app, version = %request.version, "submitting query");
        let outcome = self.api.submit_job(&request).await;

        let Some(tab) = self.workspace.tab_mut(tab_id) else {
            return Err(WorkspaceError::UnknownTab(tab_id.clone()).into());
        };
        let job_id = match outcome {
            SubmitOutcome::Created { id } => id,
            SubmitOutcome::Conflict { error } => {
                return Err(reject(tab, SubmitError::Rejected { message: error }));
            }
            SubmitOutcome::Unauthorized => return Err(reject(tab, SubmitError::Unauthorized)),
            SubmitOutcome::ServerError { message } => {
                return Err(reject(tab, SubmitError::Server { message }));
            }
        };

        if let Some(stale) = tab.take_poll() {
            stale.cancel();
        }
        tab.reset_for_submission();
        tab.active_job = Some(QueryJob::submitted(job_id.clone(), &request));
        tab.progress = Some(ProgressTracker::new(self.config.progress_mode).advance(None));
        tab.poll = Some(spawn_poll(
            Arc::clone(&self.api),
            &self.events,
            tab_id,
            &job_id,
            self.config,
        ));
        tracing::info!(tab = %tab_id, job_id = %job_id, "query accepted");

        Ok(JobHandle {
            tab_id: tab_id.clone(),
            job_id,
        })
    }

    /// Folds an event into its tab. Events for closed tabs, superseded jobs or
    /// already-finished polls are dropped and return `None`.
    pub fn apply(&mut self, event: TabEvent) -> Option<AppliedEvent> {
        let tab = self.workspace.tab_mut(&event.tab_id)?;
        let current = tab.active_job.as_ref()?;
        if current.id != event.job_id || !tab.is_polling() {
            tracing::trace!(tab = %event.tab_id, job_id = %event.job_id, "dropping stale event");
            return None;
        }

        match event.kind {
            TabEventKind::Elapsed(elapsed) => {
                tab.elapsed_label = elapsed_label(elapsed);
                Some(AppliedEvent::Ticked)
            }
            TabEventKind::Poll(step) => apply_step(tab, step),
        }
    }

    pub fn close_tab(&mut self, tab_id: &TabId) -> Result<(), WorkspaceError> {
        let mut removed = self.workspace.remove_tab(tab_id)?;
        if let Some(poll) = removed.take_poll() {
            poll.cancel();
        }
        Ok(())
    }

    pub fn close_all_tabs(&mut self) {
        for tab_id in self.workspace.closeable_ids() {
            if let Err(error) = self.close_tab(&tab_id) {
                tracing::warn!(tab = %tab_id, %error, "failed to close tab");
            }
        }
    }
}

fn reject(tab: &mut WorkspaceTab, error: SubmitError) -> SubmitError {
    tracing::warn!(tab = %tab.id(), %error, "query submission refused");
    tab.in_flight = false;
    tab.set_notice(error.user_message());
    error
}

fn spawn_poll<A: JobApi + 'static>(
    api: Arc<A>,
    events: &mpsc::UnboundedSender<TabEvent>,
    tab_id: &TabId,
    job_id: &JobId,
    config: LifecycleConfig,
) -> PollHandle {
    let token = CancellationToken::new();
    let started_at = Instant::now();

    let poll_task = {
        let mut poller = StatusPoller::new(
            api,
            job_id.clone(),
            token.clone(),
            config.poll_interval,
            config.progress_mode,
        );
        let events = events.clone();
        let tab_id = tab_id.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            while let Some(step) = poller.next_step().await {
                let event = TabEvent {
                    tab_id: tab_id.clone(),
                    job_id: job_id.clone(),
                    kind: TabEventKind::Poll(step),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        })
    };

    let ticker_task = {
        let token = token.clone();
        let events = events.clone();
        let tab_id = tab_id.clone();
        let job_id = job_id.clone();
        let period = config.elapsed_tick.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = time::interval_at(started_at + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if token.is_cancelled() {
                    break;
                }
                let event = TabEvent {
                    tab_id: tab_id.clone(),
                    job_id: job_id.clone(),
                    kind: TabEventKind::Elapsed(started_at.elapsed()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        })
    };

    PollHandle {
        token,
        poll_task,
        ticker_task,
        started_at,
    }
}

fn apply_step(tab: &mut WorkspaceTab, step: PollStep) -> Option<AppliedEvent> {
    let snapshot = match &step {
        PollStep::Running { snapshot, .. }
        | PollStep::Succeeded { snapshot, .. }
        | PollStep::Failed { snapshot } => Some(snapshot),
        PollStep::Unreachable { .. } => None,
    };
    if let (Some(snapshot), Some(job)) = (snapshot, tab.active_job.as_mut()) {
        if let Err(error) = job.apply_snapshot(snapshot) {
            tracing::warn!(tab = %tab.id(), %error, "ignoring out-of-order job snapshot");
            return None;
        }
    }

    match step {
        PollStep::Running { snapshot, report } => {
            tab.log.append_chunk(snapshot.log_text());
            tab.progress = Some(report);
            Some(AppliedEvent::Progressed)
        }
        PollStep::Succeeded { snapshot, report } => {
            let elapsed = finish(tab);
            tab.log.append_chunk(snapshot.log_text());
            tab.progress = Some(report);
            tab.elapsed_label = elapsed_label(elapsed);
            let table = tab.active_job.as_ref().map(|job| {
                ResultTable::new(
                    job.result_titles.clone(),
                    &job.result_rows,
                    job.row_count,
                    job.result_url.clone(),
                )
            });
            if let Some(table) = table {
                tracing::info!(tab = %tab.id(), rows = table.total(), "query succeeded");
                tab.set_result(table);
            }
            Some(AppliedEvent::Succeeded)
        }
        PollStep::Failed { snapshot } => {
            finish(tab);
            tab.log.clear();
            if let Some(error) = snapshot.error.as_deref() {
                tab.log.append_chunk(error);
            }
            tab.log.append_chunk(snapshot.log_text());
            tab.progress = None;
            tab.elapsed_label.clear();
            tracing::info!(tab = %tab.id(), "query failed");
            Some(AppliedEvent::Failed)
        }
        PollStep::Unreachable { message } => {
            finish(tab);
            tab.progress = None;
            tab.set_notice(message);
            Some(AppliedEvent::Unreachable)
        }
    }
}

fn finish(tab: &mut WorkspaceTab) -> Duration {
    tab.in_flight = false;
    tab.take_poll().map_or(Duration::ZERO, |poll| {
        poll.cancel();
        poll.elapsed()
    })
}

fn elapsed_label(elapsed: Duration) -> String {
    format!("{}{}", labels::ELAPSED_PREFIX, format_elapsed(elapsed))
}

/// Formats a duration as `HH:MM:SS`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{
        format_elapsed, AppliedEvent, CancellationToken, LifecycleConfig, PollStep,
        QueryLifecycleController, StatusPoller, SubmitError, TabEventReceiver,
    };
    use crate::api::ApiError;
    use crate::job::{JobApi, JobId, JobRequest, JobSnapshot, JobStatus, SubmitOutcome};
    use crate::progress::ProgressMode;
    use crate::validation::ValidationError;
    use crate::workspace::TabId;

    #[derive(Debug)]
    struct ScriptedJobApi {
        outcome: Mutex<SubmitOutcome>,
        snapshots: Mutex<VecDeque<Result<JobSnapshot, ApiError>>>,
        submits: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedJobApi {
        fn new(outcome: SubmitOutcome, snapshots: Vec<Result<JobSnapshot, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(outcome),
                snapshots: Mutex::new(snapshots.into()),
                submits: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            })
        }

        fn accepting(snapshots: Vec<Result<JobSnapshot, ApiError>>) -> Arc<Self> {
            Self::new(
                SubmitOutcome::Created {
                    id: JobId::new("42"),
                },
                snapshots,
            )
        }
    }

    #[async_trait]
    impl JobApi for ScriptedJobApi {
        async fn submit_job(&self, _request: &JobRequest) -> SubmitOutcome {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.outcome.lock().expect("outcome lock").clone()
        }

        async fn fetch_job(&self, _job_id: &JobId) -> Result<JobSnapshot, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.snapshots
                .lock()
                .expect("snapshot lock")
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot(json!({"status": "running", "log": "working"}))))
        }
    }

    fn snapshot(value: serde_json::Value) -> JobSnapshot {
        serde_json::from_value(value).expect("snapshot should decode")
    }

    fn running() -> Result<JobSnapshot, ApiError> {
        Ok(snapshot(json!({"status": "running", "log": "stage 1\nstage 2"})))
    }

    fn succeeded() -> Result<JobSnapshot, ApiError> {
        Ok(snapshot(json!({
            "status": "succeeded",
            "log": "done",
            "result": {"titles": ["a"], "values": [[1]]},
            "url": "results/42.csv",
            "count": 1
        })))
    }

    fn controller(
        api: &Arc<ScriptedJobApi>,
    ) -> (QueryLifecycleController<ScriptedJobApi>, TabEventReceiver) {
        QueryLifecycleController::new(Arc::clone(api), LifecycleConfig::default())
    }

    async fn run_to_terminal(
        controller: &mut QueryLifecycleController<ScriptedJobApi>,
        events: &mut TabEventReceiver,
    ) -> AppliedEvent {
        loop {
            let event = events.recv().await.expect("event stream should stay open");
            if let Some(applied) = controller.apply(event) {
                if applied.is_terminal() {
                    return applied;
                }
            }
        }
    }

    fn tab0() -> TabId {
        TabId::from_index(0)
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_never_reaches_server() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, _events) = controller(&api);

        let missing_app = controller
            .submit(&tab0(), None, Some("v1"), "select 1")
            .await
            .expect_err("app is required");
        let empty_sql = controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "   ")
            .await
            .expect_err("sql is required");

        assert_eq!(missing_app, SubmitError::Validation(ValidationError::MissingApp));
        assert_eq!(missing_app.user_message(), "请选择产品");
        assert_eq!(empty_sql, SubmitError::Validation(ValidationError::EmptyQuery));
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
        assert!(!controller.workspace().active_tab().is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_job_fills_result_panel() {
        let api = ScriptedJobApi::accepting(vec![running(), succeeded()]);
        let (mut controller, mut events) = controller(&api);

        let handle = controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select a from t")
            .await
            .expect("submission should be accepted");
        assert_eq!(handle.job_id.as_str(), "42");
        assert!(controller.workspace().active_tab().is_in_flight());

        let terminal = run_to_terminal(&mut controller, &mut events).await;
        assert_eq!(terminal, AppliedEvent::Succeeded);

        let tab = controller.workspace().active_tab();
        let result = tab.result().expect("result panel should be shown");
        assert_eq!(result.caption(), "共 1 条记录");
        assert_eq!(result.rows(), &[vec!["1".to_string()]]);
        assert_eq!(result.download_url(), Some("results/42.csv"));
        assert_eq!(tab.progress().map(|report| report.displayed), Some(100));
        assert!(tab.elapsed_label().starts_with("本次查询执行时间：00:00:0"));
        assert_eq!(tab.log().tail(5), vec!["stage 1", "stage 2", "done"]);
        assert!(!tab.is_in_flight());
        assert!(!tab.is_polling());
        assert_eq!(
            tab.active_job().map(crate::job::QueryJob::status),
            Some(JobStatus::Succeeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn log_pane_accumulates_every_poll() {
        let api = ScriptedJobApi::accepting(vec![
            Ok(snapshot(json!({"status": "running", "log": "starting"}))),
            Ok(snapshot(json!({"status": "running", "log": "stage 2"}))),
            succeeded(),
        ]);
        let (mut controller, mut events) = controller(&api);
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");

        run_to_terminal(&mut controller, &mut events).await;

        assert_eq!(
            controller.workspace().active_tab().log().tail(10),
            vec!["starting", "stage 2", "done"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_shows_syntax_notice_without_polling() {
        let api = ScriptedJobApi::new(
            SubmitOutcome::Conflict {
                error: "syntax error".to_string(),
            },
            Vec::new(),
        );
        let (mut controller, _events) = controller(&api);

        let error = controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "selec 1")
            .await
            .expect_err("409 should be reported");

        assert!(matches!(error, SubmitError::Rejected { .. }));
        let tab = controller.workspace().active_tab();
        assert_eq!(
            tab.notice(),
            Some("参数错误,查询不符合sql的语法:syntax error")
        );
        assert!(!tab.is_in_flight());
        assert!(tab.active_job().is_none());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_and_server_errors_set_notices() {
        let api = ScriptedJobApi::new(SubmitOutcome::Unauthorized, Vec::new());
        let (mut controller, _events) = controller(&api);
        let error = controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect_err("401 should be reported");
        assert_eq!(error, SubmitError::Unauthorized);
        assert_eq!(controller.workspace().active_tab().notice(), Some("用户Id不存在"));

        let api = ScriptedJobApi::new(
            SubmitOutcome::ServerError {
                message: "connection refused".to_string(),
            },
            Vec::new(),
        );
        let (mut controller, _events) = super::QueryLifecycleController::new(
            Arc::clone(&api),
            LifecycleConfig::default(),
        );
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect_err("server failure should be reported");
        assert_eq!(
            controller.workspace().active_tab().notice(),
            Some("服务器已停止或服务器没有响应")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_submission_is_rejected_while_in_flight() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, _events) = controller(&api);

        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("first submission is accepted");
        let error = controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 2")
            .await
            .expect_err("tab is busy");

        assert_eq!(error, SubmitError::InFlight(tab0()));
        assert_eq!(api.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tabs_poll_independently() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, _events) = controller(&api);
        let second = controller.workspace_mut().open_tab(None);

        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("tab0 accepts");
        controller
            .submit(&second, Some("Shop"), Some("v1"), "select 2")
            .await
            .expect("tab1 accepts");

        assert_eq!(api.submits.load(Ordering::SeqCst), 2);
        assert!(controller.workspace().tab(&tab0()).is_some_and(|tab| tab.is_polling()));
        assert!(controller.workspace().tab(&second).is_some_and(|tab| tab.is_polling()));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_tab_stops_its_timers() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, mut events) = controller(&api);
        let tab = controller.workspace_mut().open_tab(None);

        controller
            .submit(&tab, Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");
        let first = events.recv().await.expect("first poll arrives");
        assert_eq!(controller.apply(first), Some(AppliedEvent::Progressed));

        controller.close_tab(&tab).expect("tab closes");
        let fetches_at_close = api.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(api.fetches.load(Ordering::SeqCst), fetches_at_close);
        while let Ok(event) = events.try_recv() {
            assert_eq!(controller.apply(event), None);
        }
        assert_eq!(controller.workspace().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_keeps_workspace_tab() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, _events) = controller(&api);
        controller.workspace_mut().open_tab(None);
        controller.workspace_mut().open_tab(None);

        controller.close_all_tabs();

        assert_eq!(controller.workspace().len(), 1);
        assert_eq!(controller.workspace().active_id(), tab0());
    }

    #[tokio::test(start_paused = true)]
    async fn displayed_progress_is_monotonic_and_capped() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let (mut controller, mut events) = controller(&api);
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");

        let mut seen = Vec::new();
        while seen.len() < 120 {
            let event = events.recv().await.expect("events keep flowing");
            if controller.apply(event) == Some(AppliedEvent::Progressed) {
                let report = controller
                    .workspace()
                    .active_tab()
                    .progress()
                    .expect("running tab shows progress");
                seen.push(report.displayed);
            }
        }

        assert_eq!(seen.first(), Some(&10));
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(seen.iter().all(|value| *value <= 95));
        assert_eq!(seen.last(), Some(&95));
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_terminal_event_is_applied() {
        let api = ScriptedJobApi::accepting(vec![succeeded(), succeeded()]);
        let (mut controller, mut events) = controller(&api);
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");

        run_to_terminal(&mut controller, &mut events).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut extra_terminals = 0;
        while let Ok(event) = events.try_recv() {
            if controller.apply(event).is_some_and(AppliedEvent::is_terminal) {
                extra_terminals += 1;
            }
        }
        assert_eq!(extra_terminals, 0);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_shows_error_above_log() {
        let api = ScriptedJobApi::accepting(vec![Ok(snapshot(json!({
            "status": "failed",
            "error": "table not found",
            "log": "parse ok\nplan failed"
        })))]);
        let (mut controller, mut events) = controller(&api);
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");

        let terminal = run_to_terminal(&mut controller, &mut events).await;

        assert_eq!(terminal, AppliedEvent::Failed);
        let tab = controller.workspace().active_tab();
        assert_eq!(
            tab.log().tail(10),
            vec!["table not found", "parse ok", "plan failed"]
        );
        assert!(tab.progress().is_none());
        assert!(tab.elapsed_label().is_empty());
        assert!(tab.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_server_returns_tab_to_idle() {
        let api = ScriptedJobApi::accepting(vec![running(), Err(ApiError::transport("reset"))]);
        let (mut controller, mut events) = controller(&api);
        controller
            .submit(&tab0(), Some("Shop"), Some("v1"), "select 1")
            .await
            .expect("submission accepted");

        let terminal = run_to_terminal(&mut controller, &mut events).await;

        assert_eq!(terminal, AppliedEvent::Unreachable);
        let tab = controller.workspace().active_tab();
        assert_eq!(tab.notice(), Some("服务器已停止或服务器没有响应"));
        assert!(!tab.is_in_flight());
        assert_eq!(
            tab.active_job().map(crate::job::QueryJob::status),
            Some(JobStatus::Running)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stops_after_cancellation() {
        let api = ScriptedJobApi::accepting(Vec::new());
        let token = CancellationToken::new();
        let mut poller = StatusPoller::new(
            Arc::clone(&api),
            JobId::new("7"),
            token.clone(),
            Duration::from_secs(1),
            ProgressMode::Synthetic,
        );

        let first = poller.next_step().await.expect("first step is immediate");
        assert!(matches!(first, PollStep::Running { .. }));
        token.cancel();
        assert_eq!(poller.next_step().await, None);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn elapsed_is_formatted_as_clock() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "01:02:05");
    }
}
