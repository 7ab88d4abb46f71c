//! The persisted settings document and its store.
//!
//! Settings live in a single JSON file, replaced atomically on every write.
//! `PATCH`-style updates deep-merge a partial document into the current one;
//! unknown keys are dropped on the way back through the typed shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An error from loading or saving the settings document.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file")]
    Io(#[from] std::io::Error),
    #[error("invalid settings document")]
    Invalid(#[from] serde_json::Error),
}

/// Work-item tracker (Azure DevOps) coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureDevOpsSettings {
    /// Organization name.
    pub org: String,
    /// Project name.
    pub project: String,
    /// REST API version sent as `api-version`.
    pub api_version: String,
}

impl Default for AzureDevOpsSettings {
    fn default() -> Self {
        Self {
            org: String::new(),
            project: String::new(),
            api_version: "7.0".to_string(),
        }
    }
}

/// SCM (GitHub) coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GithubSettings {
    /// API base URL; the GraphQL endpoint is `<apiUrl>/graphql`.
    pub api_url: String,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Which sources a job polls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnabledServices {
    /// Public Q&A (Stack Overflow).
    pub qa_public: bool,
    /// Internal Q&A instance.
    pub qa_internal: bool,
    /// SCM issues (GitHub).
    pub scm_issues: bool,
}

impl Default for EnabledServices {
    fn default() -> Self {
        Self {
            qa_public: true,
            qa_internal: false,
            scm_issues: true,
        }
    }
}

impl EnabledServices {
    /// True when no source is enabled.
    pub fn is_empty(&self) -> bool {
        !(self.qa_public || self.qa_internal || self.scm_issues)
    }

    /// Number of enabled sources.
    pub fn count(&self) -> u32 {
        u32::from(self.qa_public) + u32::from(self.qa_internal) + u32::from(self.scm_issues)
    }
}

/// Default query parameters applied when a job request omits them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryDefaults {
    /// Days to reach back, 1..=365.
    pub number_of_days_to_query: u16,
    /// Local hour of day the window starts at, 0..=23.
    pub start_hour: u8,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            number_of_days_to_query: 1,
            start_hour: 10,
        }
    }
}

/// One GitHub repository to poll, optionally restricted to a label.
///
/// `repo` is `owner/name`. When `label` is set, the search is scoped to that
/// label and the label-event filter applies; `excludeLabels` adds
/// `-label:` terms to the search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoSpec {
    /// `owner/name` slug.
    pub repo: String,
    /// Optional label the search is scoped to.
    pub label: Option<String>,
    /// Labels excluded from the search.
    pub exclude_labels: Vec<String>,
}

impl RepoSpec {
    /// The repository short-name (the part after the slash), lowercased.
    pub fn short_name(&self) -> String {
        self.repo
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(self.repo.as_str())
            .to_lowercase()
    }
}

/// Per-source polling targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Repositories {
    /// GitHub repositories (one GraphQL search per entry).
    pub github: Vec<RepoSpec>,
    /// Public Q&A tags (one fetch per tag).
    pub stack_overflow: Vec<String>,
    /// Internal Q&A tags.
    pub internal_stack_overflow: Vec<String>,
}

/// Last/previous run display timestamps, rotated at job start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Timestamps {
    /// When the most recent job started.
    pub last_run: Option<String>,
    /// The run before that.
    pub previous_run: Option<String>,
}

/// The full settings document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Work-item tracker coordinates.
    pub azure_dev_ops: AzureDevOpsSettings,
    /// SCM coordinates.
    pub github: GithubSettings,
    /// Serve canned fixture data instead of calling upstreams.
    pub use_test_data: bool,
    /// Raise the log filter to debug.
    pub is_verbose: bool,
    /// Sources enabled by default.
    pub enabled_services: EnabledServices,
    /// Query parameter defaults.
    pub query_defaults: QueryDefaults,
    /// Whether new issues are pushed to the tracker by default.
    pub push_to_dev_ops: bool,
    /// Polling targets per source.
    pub repositories: Repositories,
    /// Run timestamps.
    pub timestamp: Timestamps,
    /// UI theme name (carried for the shell; the core does not interpret it).
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            azure_dev_ops: AzureDevOpsSettings::default(),
            github: GithubSettings::default(),
            use_test_data: false,
            is_verbose: false,
            enabled_services: EnabledServices::default(),
            query_defaults: QueryDefaults::default(),
            push_to_dev_ops: true,
            repositories: Repositories::default(),
            timestamp: Timestamps::default(),
            theme: "light".to_string(),
        }
    }
}

impl Settings {
    fn normalize(&mut self) {
        self.query_defaults.number_of_days_to_query =
            self.query_defaults.number_of_days_to_query.clamp(1, 365);
        self.query_defaults.start_hour = self.query_defaults.start_hour.min(23);
        if self.theme.is_empty() {
            self.theme = "light".to_string();
        }
    }
}

/// Store for the settings document. Reads fall back to defaults when the
/// file does not exist; writes replace the file atomically.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the current document, or defaults when none has been saved.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            let mut settings = Settings::default();
            settings.normalize();
            return Ok(settings);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let mut settings: Settings = serde_json::from_str(&raw)?;
        settings.normalize();
        Ok(settings)
    }

    /// Persist the document.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let mut settings = settings.clone();
        settings.normalize();

        let dir = self
            .path
            .parent()
            .ok_or_else(|| std::io::Error::other("settings path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(&settings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, &self.path)?;
        Ok(())
    }

    /// Deep-merge a partial document into the current one and persist.
    /// Returns the updated settings.
    pub fn apply_patch(&self, patch: serde_json::Value) -> Result<Settings, SettingsError> {
        let current = self.load()?;
        let mut doc = serde_json::to_value(&current)?;
        merge(&mut doc, patch);
        let mut updated: Settings = serde_json::from_value(doc)?;
        updated.normalize();
        self.save(&updated)?;
        Ok(updated)
    }

    /// Rotate `timestamp.lastRun` into `previousRun` and record a new
    /// `lastRun`. Returns the updated settings.
    pub fn rotate_timestamp(&self, last_run: String) -> Result<Settings, SettingsError> {
        let mut settings = self.load()?;
        settings.timestamp.previous_run = settings.timestamp.last_run.take();
        settings.timestamp.last_run = Some(last_run);
        self.save(&settings)?;
        Ok(settings)
    }

    /// The file path backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
