//! Mapping of upstream records to [`NormalizedIssue`]s: deduplication, title
//! truncation, tag and SDK derivation, URL canonicalization.

use std::collections::HashSet;

use reqwest::Url;
use support_tracker_core::issue::{NormalizedIssue, SourceKind};
use support_tracker_core::settings::RepoSpec;
use support_tracker_core::window::QueryWindow;

use crate::upstream::qa::QaQuestion;
use crate::upstream::scm::ScmIssue;

/// Maximum title length, in code points.
const TITLE_MAX: usize = 255;

/// Tag applied to support-labelled SCM issues.
const SUPPORT_TAG: &str = "[Support Labelled]";

const SUPPORT_LABELS: [&str; 2] = ["support", "team: support"];

/// Truncate to at most 255 code points. No HTML escaping happens here; the
/// presentation layer owns that.
pub(crate) fn truncate_title(title: &str) -> String {
    if title.chars().count() <= TITLE_MAX {
        return title.to_string();
    }
    title.chars().take(TITLE_MAX).collect()
}

/// SDK for a repository short-name, via the fixed suffix table.
pub(crate) fn sdk_for_repo(short_name: &str) -> &'static str {
    if short_name.ends_with("-java") {
        "Java"
    } else if short_name.ends_with("-js") {
        "Node"
    } else if short_name.ends_with("-dotnet") {
        "C#"
    } else if short_name.ends_with("-python") {
        "Python"
    } else {
        "(Unknown)"
    }
}

/// The derived tag string for a set of SCM labels.
pub(crate) fn tags_for_labels<S: AsRef<str>>(labels: &[S]) -> String {
    let support = labels
        .iter()
        .any(|l| SUPPORT_LABELS.contains(&l.as_ref().to_lowercase().as_str()));
    if support {
        SUPPORT_TAG.to_string()
    } else {
        String::new()
    }
}

/// Collapse duplicates, keeping the first occurrence in order.
pub(crate) fn dedup_first_seen<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Normalize one page-set of Q&A questions (possibly spanning several tags).
/// Dedup key is the question id; the canonical URL is `<site>/questions/<id>`.
pub(crate) fn normalize_qa(
    kind: SourceKind,
    site: &Url,
    questions: Vec<QaQuestion>,
) -> Vec<NormalizedIssue> {
    let deduped = dedup_first_seen(questions, |q| q.question_id);
    deduped
        .into_iter()
        .map(|q| NormalizedIssue {
            issue_id: q.question_id.to_string(),
            source: kind,
            title: truncate_title(&q.title),
            tags: String::new(),
            sdk: String::new(),
            repository: String::new(),
            url: canonical_question_url(site, q.question_id),
        })
        .collect()
}

pub(crate) fn canonical_question_url(site: &Url, question_id: u64) -> String {
    let base = site.as_str().trim_end_matches('/');
    format!("{base}/questions/{question_id}")
}

/// Normalize SCM issues (possibly spanning several repositories). Dedup key
/// is the upstream-provided URL, which is kept as-is.
pub(crate) fn normalize_scm(issues: Vec<ScmIssue>) -> Vec<NormalizedIssue> {
    let deduped = dedup_first_seen(issues, |i| i.url.clone());
    deduped
        .into_iter()
        .map(|issue| {
            let repository = issue.repository.to_lowercase();
            let sdk = sdk_for_repo(&repository).to_string();
            NormalizedIssue {
                issue_id: issue.number.to_string(),
                source: SourceKind::ScmIssues,
                title: truncate_title(&issue.title),
                tags: tags_for_labels(&issue.labels),
                sdk,
                repository,
                url: issue.url,
            }
        })
        .collect()
}

/// Keep only issues whose queried label was applied strictly after the window
/// start. The `created:` search filter is inclusive at day granularity; the
/// per-event check restores correctness when a label was applied later.
pub(crate) fn filter_by_label_event(
    issues: Vec<ScmIssue>,
    label: &str,
    window: QueryWindow,
) -> Vec<ScmIssue> {
    let wanted = label.to_lowercase();
    issues
        .into_iter()
        .filter(|issue| {
            issue
                .label_events
                .iter()
                .any(|ev| ev.label.to_lowercase() == wanted && ev.created_at > window.from_utc)
        })
        .collect()
}

/// Configured Q&A tags for a source, from the settings repositories block.
pub(crate) fn qa_tags(settings: &support_tracker_core::Settings, kind: SourceKind) -> Vec<String> {
    match kind {
        SourceKind::QaPublic => settings.repositories.stack_overflow.clone(),
        SourceKind::QaInternal => settings.repositories.internal_stack_overflow.clone(),
        SourceKind::ScmIssues => Vec::new(),
    }
}

/// Configured SCM repositories.
pub(crate) fn scm_repos(settings: &support_tracker_core::Settings) -> Vec<RepoSpec> {
    settings.repositories.github.clone()
}
