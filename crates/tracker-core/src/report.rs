//! The per-run report document (what was found, what matched, what was new).
//!
//! The document is reset to an empty template when a job starts and updated
//! section by section as each source completes a stage. Writes are whole-file
//! atomic replaces; the only writer is the reconciler currently executing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::{MirrorCandidate, NormalizedIssue, SourceKind};

/// An error from the report store.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to access the report document")]
    Io(#[from] std::io::Error),
    #[error("report document is corrupt")]
    Corrupt(#[from] serde_json::Error),
    #[error("report write task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// An ordered set of normalized issues with its materialized count.
///
/// `count` always equals `issues.len()`; construct through [`IssueSet::new`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueSet {
    /// The issues, in first-seen order.
    pub issues: Vec<NormalizedIssue>,
    /// Number of issues.
    pub count: u32,
}

impl IssueSet {
    /// Build a set from a sequence, materializing the count.
    pub fn new(issues: Vec<NormalizedIssue>) -> Self {
        let count = issues.len() as u32;
        Self { issues, count }
    }
}

/// One source's slice of the run report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceSection {
    /// Everything fetched and normalized this run.
    pub found: IssueSet,
    /// Work items already mirroring a found issue.
    pub dev_ops: Vec<MirrorCandidate>,
    /// Issues classified as new this run.
    pub new_issues: IssueSet,
}

/// The report body, keyed per source plus run timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunReport {
    /// Job start, rendered for display.
    pub start_time: Option<String>,
    /// Job end, rendered for display. `None` while running or cancelled.
    pub end_time: Option<String>,
    /// Job start as a UTC instant.
    pub started_utc: Option<DateTime<Utc>>,
    /// Job end as a UTC instant.
    pub ended_utc: Option<DateTime<Utc>>,
    /// Public Q&A section.
    pub stack_overflow: SourceSection,
    /// Internal Q&A section.
    pub internal_stack_overflow: SourceSection,
    /// SCM issues section.
    pub github: SourceSection,
}

impl RunReport {
    /// Borrow the section for a source.
    pub fn section(&self, kind: SourceKind) -> &SourceSection {
        match kind {
            SourceKind::QaPublic => &self.stack_overflow,
            SourceKind::QaInternal => &self.internal_stack_overflow,
            SourceKind::ScmIssues => &self.github,
        }
    }

    fn section_mut(&mut self, kind: SourceKind) -> &mut SourceSection {
        match kind {
            SourceKind::QaPublic => &mut self.stack_overflow,
            SourceKind::QaInternal => &mut self.internal_stack_overflow,
            SourceKind::ScmIssues => &mut self.github,
        }
    }
}

/// The persisted document; everything lives under a single `index` record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunDocument {
    /// The report body.
    pub index: RunReport,
}

/// Render an instant the way the report displays times.
pub fn display_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%-m/%-d/%Y, %-I:%M:%S %p")
        .to_string()
}

/// Store for the run report document.
#[derive(Debug, Clone)]
pub struct ReportStore {
    path: PathBuf,
}

impl ReportStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the current document; an empty template when none exists.
    pub fn load(&self) -> Result<RunDocument, ReportError> {
        if !self.path.exists() {
            return Ok(RunDocument::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overwrite the document with the empty template, stamping the start time.
    pub async fn reset(&self, started: DateTime<Utc>) -> Result<(), ReportError> {
        let doc = RunDocument {
            index: RunReport {
                start_time: Some(display_time(started)),
                started_utc: Some(started),
                ..Default::default()
            },
        };
        self.persist(doc).await
    }

    /// Record a source's `found` issues.
    pub async fn update_found(&self, kind: SourceKind, found: IssueSet) -> Result<(), ReportError> {
        let mut doc = self.load()?;
        doc.index.section_mut(kind).found = found;
        self.persist(doc).await
    }

    /// Record a source's mirror candidates.
    pub async fn update_dev_ops(
        &self,
        kind: SourceKind,
        dev_ops: Vec<MirrorCandidate>,
    ) -> Result<(), ReportError> {
        let mut doc = self.load()?;
        doc.index.section_mut(kind).dev_ops = dev_ops;
        self.persist(doc).await
    }

    /// Record a source's new issues.
    pub async fn update_new_issues(
        &self,
        kind: SourceKind,
        new_issues: IssueSet,
    ) -> Result<(), ReportError> {
        let mut doc = self.load()?;
        doc.index.section_mut(kind).new_issues = new_issues;
        self.persist(doc).await
    }

    /// Stamp the end time.
    pub async fn finish(&self, ended: DateTime<Utc>) -> Result<(), ReportError> {
        let mut doc = self.load()?;
        doc.index.end_time = Some(display_time(ended));
        doc.index.ended_utc = Some(ended);
        self.persist(doc).await
    }

    async fn persist(&self, doc: RunDocument) -> Result<(), ReportError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist_file(&path, &doc)).await??;
        Ok(())
    }

    /// The file path backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persist_file(path: &Path, doc: &RunDocument) -> Result<(), ReportError> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("report path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
