//! The per-source reconciliation pipeline: fetch, normalize, mirror-lookup,
//! diff, create. Each stage observes the job's cancellation token before and
//! after every outbound request, and failures come back as values attributed
//! to the upstream that actually failed.

use std::time::Duration;

use support_tracker_core::issue::{MirrorCandidate, NormalizedIssue, SourceKind};
use support_tracker_core::report::{IssueSet, ReportStore};
use support_tracker_core::secrets::{SecretKey, SecretStore};
use support_tracker_core::settings::Settings;
use support_tracker_core::window::QueryWindow;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::EngineConfig;
use crate::error::{Service, SourceFailure, UpstreamError};
use crate::upstream::qa::{self, QaRole};
use crate::upstream::scm;
use crate::upstream::tracker::TrackerClient;
use crate::{normalize, testdata};

pub(crate) type ProgressFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Everything one source's reconciliation needs.
pub(crate) struct SourceRun<'a> {
    pub(crate) http: &'a reqwest::Client,
    pub(crate) config: &'a EngineConfig,
    pub(crate) settings: &'a Settings,
    pub(crate) secrets: &'a dyn SecretStore,
    pub(crate) reports: &'a ReportStore,
    pub(crate) window: QueryWindow,
    pub(crate) push: bool,
    pub(crate) token: &'a CancellationToken,
    pub(crate) progress: ProgressFn<'a>,
}

/// Terminal report of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceReport {
    pub(crate) status: u16,
    pub(crate) message: String,
}

pub(crate) fn checkpoint(token: &CancellationToken) -> Result<(), UpstreamError> {
    if token.is_cancelled() {
        return Err(UpstreamError::Cancelled);
    }
    Ok(())
}

/// Run a request future, aborting it as soon as the token fires.
pub(crate) async fn guarded<T, F>(token: &CancellationToken, fut: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    checkpoint(token)?;
    tokio::select! {
        _ = token.cancelled() => Err(UpstreamError::Cancelled),
        res = fut => res,
    }
}

/// A politeness sleep that doubles as a cancellation checkpoint.
pub(crate) async fn pause(token: &CancellationToken, delay: Duration) -> Result<(), UpstreamError> {
    checkpoint(token)?;
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = token.cancelled() => Err(UpstreamError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Drive one source through the full pipeline and return its terminal report.
pub(crate) async fn run_source(
    run: &SourceRun<'_>,
    kind: SourceKind,
) -> Result<SourceReport, SourceFailure> {
    let source = Service::from(kind);
    let store_err = |e: support_tracker_core::ReportError| {
        SourceFailure::new(source, UpstreamError::Internal(format!("{e}")))
    };

    let issues = collect_issues(run, kind).await?;
    run.reports
        .update_found(kind, IssueSet::new(issues.clone()))
        .await
        .map_err(store_err)?;

    if issues.is_empty() {
        run.reports
            .update_dev_ops(kind, Vec::new())
            .await
            .map_err(store_err)?;
        run.reports
            .update_new_issues(kind, IssueSet::default())
            .await
            .map_err(store_err)?;
        debug!(source = kind.label(), "nothing found");
        return Ok(SourceReport {
            status: 204,
            message: format!("No new {} found.", kind.noun()),
        });
    }

    // Test-data mode never reaches the tracker: everything counts as new and
    // nothing is pushed.
    if run.settings.use_test_data {
        run.reports
            .update_dev_ops(kind, Vec::new())
            .await
            .map_err(store_err)?;
        let count = issues.len();
        run.reports
            .update_new_issues(kind, IssueSet::new(issues))
            .await
            .map_err(store_err)?;
        return Ok(SourceReport {
            status: 200,
            message: format!("{count} new issue(s) found but not pushed"),
        });
    }

    let tracker = TrackerClient::from_settings(
        run.http,
        &run.config.tracker_base,
        &run.settings.azure_dev_ops,
        run.secrets,
    )
    .map_err(|e| SourceFailure::new(Service::WorkTracker, e))?;

    let (mirrors, fresh) = classify(run, &tracker, &issues).await?;

    run.reports
        .update_dev_ops(kind, mirrors)
        .await
        .map_err(store_err)?;
    run.reports
        .update_new_issues(kind, IssueSet::new(fresh.clone()))
        .await
        .map_err(store_err)?;

    if fresh.is_empty() {
        return Ok(SourceReport {
            status: 204,
            message: format!("No new {} to add", kind.noun()),
        });
    }

    if !run.push {
        return Ok(SourceReport {
            status: 200,
            message: format!("{} new issue(s) found but not pushed", fresh.len()),
        });
    }

    let mut last_id = 0;
    for issue in &fresh {
        let created = guarded(run.token, tracker.add_work_item(issue))
            .await
            .map_err(|e| SourceFailure::new(Service::WorkTracker, e))?;
        last_id = created.id;
    }
    debug!(source = kind.label(), created = fresh.len(), "pushed new issues");

    Ok(SourceReport {
        status: 200,
        message: format!(
            "Created {} work item(s); last work item {last_id}",
            fresh.len()
        ),
    })
}

/// Split the found issues into mirror candidates and genuinely new issues.
///
/// A tracker hit whose stored title differs from the incoming title lands in
/// *both* lists: the hit is recorded, and the re-titled issue is treated as
/// new.
async fn classify(
    run: &SourceRun<'_>,
    tracker: &TrackerClient,
    issues: &[NormalizedIssue],
) -> Result<(Vec<MirrorCandidate>, Vec<NormalizedIssue>), SourceFailure> {
    let tracker_err = |e| SourceFailure::new(Service::WorkTracker, e);

    let mut mirrors = Vec::new();
    let mut fresh = Vec::new();
    for issue in issues {
        let hits = guarded(run.token, tracker.search_work_item_by_issue_id(&issue.issue_id))
            .await
            .map_err(tracker_err)?;

        let Some(hit) = hits.first() else {
            fresh.push(issue.clone());
            continue;
        };

        let item = guarded(run.token, tracker.get_work_item_by_url(&hit.url))
            .await
            .map_err(tracker_err)?;

        let stored_title = item.title().to_string();
        let renamed = stored_title != issue.title;
        mirrors.push(MirrorCandidate {
            work_item_id: item.id,
            title: stored_title,
            tracker_url: hit.url.clone(),
            issue_id: issue.issue_id.clone(),
            url: issue.url.clone(),
        });
        if renamed {
            fresh.push(issue.clone());
        }
    }

    Ok((mirrors, fresh))
}

async fn collect_issues(
    run: &SourceRun<'_>,
    kind: SourceKind,
) -> Result<Vec<NormalizedIssue>, SourceFailure> {
    match kind {
        SourceKind::QaPublic | SourceKind::QaInternal => collect_qa(run, kind).await,
        SourceKind::ScmIssues => collect_scm(run).await,
    }
}

async fn collect_qa(
    run: &SourceRun<'_>,
    kind: SourceKind,
) -> Result<Vec<NormalizedIssue>, SourceFailure> {
    let service = Service::from(kind);
    let fail = |e| SourceFailure::new(service, e);
    let internal = kind == SourceKind::QaInternal;

    let (base, site, role, delay) = if internal {
        (
            &run.config.qa_internal_base,
            &run.config.qa_internal_site,
            QaRole::Internal,
            run.config.qa_internal_delay,
        )
    } else {
        (
            &run.config.qa_public_base,
            &run.config.qa_public_site,
            QaRole::Public,
            run.config.qa_public_delay,
        )
    };

    if run.settings.use_test_data {
        (run.progress)(kind.label());
        return Ok(normalize::normalize_qa(
            kind,
            site,
            testdata::qa_questions(internal),
        ));
    }

    let api_key = if internal {
        let key = run
            .secrets
            .get(SecretKey::QaInternalKey)
            .map_err(|e| fail(UpstreamError::Configuration(format!("{e}"))))?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                fail(UpstreamError::Configuration(
                    "internal Q&A API key is not set".to_string(),
                ))
            })?;
        Some(key)
    } else {
        None
    };

    let mut raw = Vec::new();
    for tag in normalize::qa_tags(run.settings, kind) {
        (run.progress)(&format!("{} ({tag})", kind.label()));
        pause(run.token, delay).await.map_err(fail)?;

        let page = guarded(
            run.token,
            qa::fetch_questions(
                run.http,
                base,
                role,
                api_key.as_deref(),
                &tag,
                run.window,
                run.config.throttle_backoff,
            ),
        )
        .await
        .map_err(fail)?;
        raw.extend(page);
    }

    Ok(normalize::normalize_qa(kind, site, raw))
}

async fn collect_scm(run: &SourceRun<'_>) -> Result<Vec<NormalizedIssue>, SourceFailure> {
    let fail = |e| SourceFailure::new(Service::ScmIssues, e);

    if run.settings.use_test_data {
        (run.progress)(SourceKind::ScmIssues.label());
        return Ok(normalize::normalize_scm(testdata::scm_issues()));
    }

    let token = run
        .secrets
        .get(SecretKey::ScmToken)
        .map_err(|e| fail(UpstreamError::Configuration(format!("{e}"))))?
        .filter(|t| !t.is_empty())
        .ok_or_else(|| fail(UpstreamError::Configuration("SCM token is not set".to_string())))?;

    let mut collected = Vec::new();
    for repo in normalize::scm_repos(run.settings) {
        (run.progress)(&format!("GitHub ({})", repo.repo));
        pause(run.token, run.config.scm_delay).await.map_err(fail)?;

        let mut issues = guarded(
            run.token,
            scm::fetch_issues(
                run.http,
                &run.settings.github.api_url,
                &token,
                &repo,
                run.window,
                run.config.throttle_backoff,
            ),
        )
        .await
        .map_err(fail)?;

        if let Some(label) = &repo.label {
            issues = normalize::filter_by_label_event(issues, label, run.window);
        }
        // The search is scoped to one repository; the configured slug covers
        // nodes that come back without a repository name.
        let short_name = repo.short_name();
        for issue in &mut issues {
            if issue.repository.is_empty() {
                issue.repository = short_name.clone();
            }
        }
        collected.extend(issues);
    }

    Ok(normalize::normalize_scm(collected))
}
