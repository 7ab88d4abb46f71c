//! The normalized issue model shared by the reconcilers and the run report.

use serde::{Deserialize, Serialize};

/// Which upstream a normalized issue came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// The public Q&A site (Stack Overflow).
    QaPublic,
    /// The internal Q&A instance.
    QaInternal,
    /// The source-control host's issue tracker (GitHub).
    ScmIssues,
}

impl SourceKind {
    /// All sources, in the fixed order a job processes them.
    pub const ALL: [SourceKind; 3] = [
        SourceKind::QaPublic,
        SourceKind::QaInternal,
        SourceKind::ScmIssues,
    ];

    /// Key of this source's section in the run report document.
    pub fn report_key(self) -> &'static str {
        match self {
            SourceKind::QaPublic => "stackOverflow",
            SourceKind::QaInternal => "internalStackOverflow",
            SourceKind::ScmIssues => "github",
        }
    }

    /// Human-readable service label, as surfaced in progress and errors.
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::QaPublic => "Stack Overflow",
            SourceKind::QaInternal => "Internal Stack Overflow",
            SourceKind::ScmIssues => "GitHub",
        }
    }

    /// Whether items from this source are "posts" (Q&A) or "issues" (SCM)
    /// in user-facing messages.
    pub fn noun(self) -> &'static str {
        match self {
            SourceKind::QaPublic | SourceKind::QaInternal => "posts",
            SourceKind::ScmIssues => "issues",
        }
    }
}

/// A single upstream item after normalization (dedup, truncation, tag and
/// SDK derivation). This is the pipeline's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedIssue {
    /// Identifier assigned by the upstream, preserved as-is.
    pub issue_id: String,
    /// Originating source.
    pub source: SourceKind,
    /// Title, truncated to at most 255 code points. Not HTML-escaped.
    pub title: String,
    /// Derived flag string (e.g. `[Support Labelled]`), empty when none apply.
    #[serde(default)]
    pub tags: String,
    /// SDK derived from the repository name, `(Unknown)` when unmapped.
    #[serde(default)]
    pub sdk: String,
    /// Lowercased repository short-name, empty for Q&A items.
    #[serde(default)]
    pub repository: String,
    /// Canonical upstream URL.
    pub url: String,
}

/// A work item in the tracker that shares an upstream issue's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorCandidate {
    /// Tracker work-item id.
    pub work_item_id: u64,
    /// Title stored on the work item.
    pub title: String,
    /// The work item's URL inside the tracker.
    pub tracker_url: String,
    /// The upstream issue id the work item mirrors.
    pub issue_id: String,
    /// The upstream issue's canonical URL.
    pub url: String,
}
