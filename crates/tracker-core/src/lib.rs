#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared types and on-disk stores for `support-tracker` (normalized issues,
//! settings, secrets, the per-run report document, query-window derivation).

pub mod issue;
pub mod paths;
pub mod report;
pub mod secrets;
pub mod settings;
pub mod window;

pub use issue::{MirrorCandidate, NormalizedIssue, SourceKind};
pub use report::{IssueSet, ReportError, ReportStore, RunDocument, RunReport, SourceSection};
pub use secrets::{FileSecretStore, MemorySecretStore, SecretError, SecretKey, SecretStore};
pub use settings::{
    EnabledServices, QueryDefaults, RepoSpec, Settings, SettingsError, SettingsStore,
};
pub use window::QueryWindow;
