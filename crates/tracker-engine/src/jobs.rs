//! The job scheduler: issues job ids, owns each job's cancellation token,
//! runs the reconcilers in a fixed sequence, and services queries.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use support_tracker_core::issue::SourceKind;
use support_tracker_core::report::{ReportStore, display_time};
use support_tracker_core::secrets::SecretStore;
use support_tracker_core::settings::{EnabledServices, SettingsStore};
use support_tracker_core::window::QueryWindow;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{
    EngineConfig, JobProgress, JobStatus, JobSummary, JobView, QueryParams, ServiceErrorEntry,
    ServiceOutcome, StartRequest,
};
use crate::reconcile::{self, SourceRun};
use crate::validate;

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// The job was running and is now cancelled.
    Cancelled,
    /// The job had already terminated.
    AlreadyTerminal,
    /// No job with that id exists.
    NotFound,
}

#[derive(Debug)]
struct JobEntry {
    status: JobStatus,
    progress: JobProgress,
    result: Option<BTreeMap<String, ServiceOutcome>>,
    service_errors: Vec<ServiceErrorEntry>,
    error: Option<String>,
    token: CancellationToken,
    started_at: Instant,
    started_epoch_ms: i64,
    ended_at: Option<Instant>,
}

impl JobEntry {
    fn elapsed_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Instant::now);
        end.duration_since(self.started_at).as_millis() as u64
    }

    fn view(&self, id: Uuid) -> JobView {
        JobView {
            id,
            status: self.status,
            result: self.result.clone(),
            service_errors: self.service_errors.clone(),
            error: self.error.clone(),
            progress: self.progress.clone(),
            elapsed_time: self.elapsed_ms(),
        }
    }
}

struct SchedulerInner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    settings: SettingsStore,
    secrets: Arc<dyn SecretStore>,
    reports: ReportStore,
    config: EngineConfig,
    http: reqwest::Client,
}

/// The process-wide job registry and runner. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Build a scheduler over the given stores.
    pub fn new(
        settings: SettingsStore,
        secrets: Arc<dyn SecretStore>,
        reports: ReportStore,
        config: EngineConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                settings,
                secrets,
                reports,
                config,
                http,
            }),
        })
    }

    /// Start a job and return its id immediately. The work runs on its own
    /// task; a panic there moves the job to `Error` rather than killing the
    /// scheduler.
    pub fn start(&self, request: StartRequest) -> Uuid {
        let id = Uuid::new_v4();
        let params = request.params.clamped();
        let enabled = request.enabled_services;
        let token = CancellationToken::new();

        self.inner.jobs.lock().expect("jobs map lock").insert(
            id,
            JobEntry {
                status: JobStatus::Running,
                progress: JobProgress {
                    current: 0,
                    total: enabled.count(),
                    current_service: String::new(),
                },
                result: None,
                service_errors: Vec::new(),
                error: None,
                token: token.clone(),
                started_at: Instant::now(),
                started_epoch_ms: Utc::now().timestamp_millis(),
                ended_at: None,
            },
        );
        info!(job = %id, "job started");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let work = tokio::spawn(run_job(inner.clone(), id, enabled, params, token));
            if let Err(err) = work.await {
                let message = if err.is_panic() {
                    "job task panicked".to_string()
                } else {
                    format!("job task failed: {err}")
                };
                warn!(job = %id, "{message}");
                terminate(&inner, id, |entry| {
                    entry.status = JobStatus::Error;
                    entry.error = Some(message);
                });
            }
        });

        id
    }

    /// Poll a job.
    pub fn get(&self, id: Uuid) -> Option<JobView> {
        self.inner
            .jobs
            .lock()
            .expect("jobs map lock")
            .get(&id)
            .map(|entry| entry.view(id))
    }

    /// Signal a job's token and mark it cancelled, iff it is still running.
    /// Repeated cancels of a terminated job report `AlreadyTerminal`.
    pub fn cancel(&self, id: Uuid) -> CancelResult {
        let mut jobs = self.inner.jobs.lock().expect("jobs map lock");
        let Some(entry) = jobs.get_mut(&id) else {
            return CancelResult::NotFound;
        };
        if entry.status.is_terminal() {
            return CancelResult::AlreadyTerminal;
        }

        entry.token.cancel();
        entry.status = JobStatus::Cancelled;
        entry.ended_at = Some(Instant::now());
        info!(job = %id, "job cancelled");
        CancelResult::Cancelled
    }

    /// Cancel every running job. Used at shutdown.
    pub fn cancel_all(&self) {
        let jobs = self.inner.jobs.lock().expect("jobs map lock");
        let running: Vec<Uuid> = jobs
            .iter()
            .filter(|(_, entry)| !entry.status.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        drop(jobs);
        for id in running {
            let _ = self.cancel(id);
        }
    }

    /// List all known jobs, most recent first.
    pub fn list(&self) -> Vec<JobSummary> {
        let jobs = self.inner.jobs.lock().expect("jobs map lock");
        let mut summaries: Vec<JobSummary> = jobs
            .iter()
            .map(|(id, entry)| JobSummary {
                id: *id,
                status: entry.status,
                started_epoch_ms: entry.started_epoch_ms,
                elapsed_time: entry.elapsed_ms(),
            })
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.started_epoch_ms));
        summaries
    }
}

fn terminate(inner: &SchedulerInner, id: Uuid, apply: impl FnOnce(&mut JobEntry)) {
    let mut jobs = inner.jobs.lock().expect("jobs map lock");
    if let Some(entry) = jobs.get_mut(&id) {
        // A job leaves `Running` exactly once.
        if entry.status.is_terminal() {
            return;
        }
        apply(entry);
        entry.ended_at = Some(Instant::now());
    }
}

fn set_current_service(inner: &SchedulerInner, id: Uuid, unit: &str) {
    let mut jobs = inner.jobs.lock().expect("jobs map lock");
    if let Some(entry) = jobs.get_mut(&id) {
        entry.progress.current_service = unit.to_string();
    }
}

fn bump_progress(inner: &SchedulerInner, id: Uuid) {
    let mut jobs = inner.jobs.lock().expect("jobs map lock");
    if let Some(entry) = jobs.get_mut(&id) {
        entry.progress.current += 1;
    }
}

fn mark_cancelled(inner: &SchedulerInner, id: Uuid) {
    terminate(inner, id, |entry| {
        entry.status = JobStatus::Cancelled;
    });
}

fn mark_error(inner: &SchedulerInner, id: Uuid, message: String) {
    warn!(job = %id, "{message}");
    terminate(inner, id, |entry| {
        entry.status = JobStatus::Error;
        entry.error = Some(message);
    });
}

fn mark_completed(
    inner: &SchedulerInner,
    id: Uuid,
    results: BTreeMap<String, ServiceOutcome>,
    service_errors: Vec<ServiceErrorEntry>,
) {
    info!(job = %id, sources = results.len(), errors = service_errors.len(), "job completed");
    terminate(inner, id, |entry| {
        entry.status = JobStatus::Completed;
        entry.result = Some(results);
        entry.service_errors = service_errors;
        entry.progress.current_service = String::new();
    });
}

fn enabled_sources(enabled: EnabledServices) -> Vec<SourceKind> {
    SourceKind::ALL
        .into_iter()
        .filter(|kind| match kind {
            SourceKind::QaPublic => enabled.qa_public,
            SourceKind::QaInternal => enabled.qa_internal,
            SourceKind::ScmIssues => enabled.scm_issues,
        })
        .collect()
}

async fn run_job(
    inner: Arc<SchedulerInner>,
    id: Uuid,
    enabled: EnabledServices,
    params: QueryParams,
    token: CancellationToken,
) {
    let started = Utc::now();

    let settings = match inner.settings.rotate_timestamp(display_time(started)) {
        Ok(settings) => settings,
        Err(err) => return mark_error(&inner, id, format!("failed to load settings: {err}")),
    };
    if let Err(err) = inner.reports.reset(started).await {
        return mark_error(&inner, id, format!("failed to reset the run report: {err}"));
    }

    let sources = enabled_sources(enabled);
    let window = QueryWindow::starting(params.number_of_days_to_query, params.start_hour);

    let mut results: BTreeMap<String, ServiceOutcome> = BTreeMap::new();
    let mut service_errors: Vec<ServiceErrorEntry> = Vec::new();

    // Validate tracker credentials once, before any fetch.
    if !settings.use_test_data && !sources.is_empty() && params.push_to_tracker {
        set_current_service(&inner, id, "Azure DevOps");
        let check = validate::preflight(
            &inner.http,
            &inner.config.tracker_base,
            &settings,
            inner.secrets.as_ref(),
            inner.config.validation_timeout,
            &token,
        )
        .await;

        if let Err(failure) = check {
            if failure.is_cancelled() {
                return mark_cancelled(&inner, id);
            }
            service_errors.push(ServiceErrorEntry {
                service: failure.service.label().to_string(),
                message: failure.error.to_string(),
            });
            return mark_completed(&inner, id, results, service_errors);
        }
    }

    let progress = {
        let inner = inner.clone();
        move |unit: &str| set_current_service(&inner, id, unit)
    };

    for kind in sources {
        if token.is_cancelled() {
            return mark_cancelled(&inner, id);
        }
        set_current_service(&inner, id, kind.label());

        let run = SourceRun {
            http: &inner.http,
            config: &inner.config,
            settings: &settings,
            secrets: inner.secrets.as_ref(),
            reports: &inner.reports,
            window,
            push: params.push_to_tracker,
            token: &token,
            progress: &progress,
        };

        match reconcile::run_source(&run, kind).await {
            Ok(report) => {
                results.insert(
                    kind.report_key().to_string(),
                    ServiceOutcome::Done {
                        status: report.status,
                        message: report.message,
                    },
                );
            }
            Err(failure) if failure.is_cancelled() => {
                return mark_cancelled(&inner, id);
            }
            Err(failure) => {
                warn!(
                    job = %id,
                    service = failure.service.label(),
                    "source failed: {}",
                    failure.error
                );
                results.insert(
                    kind.report_key().to_string(),
                    ServiceOutcome::Failed {
                        status: "error".to_string(),
                        message: failure.error.to_string(),
                    },
                );
                service_errors.push(ServiceErrorEntry {
                    service: failure.service.label().to_string(),
                    message: failure.error.to_string(),
                });
            }
        }

        bump_progress(&inner, id);
    }

    if let Err(err) = inner.reports.finish(Utc::now()).await {
        warn!(job = %id, "failed to stamp report end time: {err}");
    }
    mark_completed(&inner, id, results, service_errors);
}
