//! Public API types for the in-process reconciliation engine.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use support_tracker_core::settings::EnabledServices;
use uuid::Uuid;

/// Configuration for the engine: upstream base URLs and pacing.
///
/// The base URLs default to the production endpoints; tests point them at a
/// local mock server. The SCM API base is not here: it comes from the
/// settings document (`github.apiUrl`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Public Q&A API base (e.g. `https://api.stackexchange.com/2.3/`).
    pub qa_public_base: Url,
    /// Internal Q&A API base.
    pub qa_internal_base: Url,
    /// Public Q&A site base, used for canonical question URLs.
    pub qa_public_site: Url,
    /// Internal Q&A site base, used for canonical question URLs.
    pub qa_internal_site: Url,
    /// Work-item tracker base (organization and project are appended).
    pub tracker_base: Url,

    /// Politeness delay before each public Q&A tag fetch.
    pub qa_public_delay: Duration,
    /// Politeness delay before each internal Q&A tag fetch.
    pub qa_internal_delay: Duration,
    /// Politeness delay before each SCM repository fetch.
    pub scm_delay: Duration,
    /// Back-off applied when an upstream answers HTTP 429.
    pub throttle_backoff: Duration,
    /// Timeout on credential-validation requests.
    pub validation_timeout: Duration,
}

impl EngineConfig {
    /// Default politeness delay before each public Q&A tag fetch.
    pub const DEFAULT_QA_PUBLIC_DELAY: Duration = Duration::from_millis(1500);

    /// Default politeness delay before each internal Q&A tag fetch.
    pub const DEFAULT_QA_INTERNAL_DELAY: Duration = Duration::from_millis(1000);

    /// Default politeness delay before each SCM repository fetch.
    pub const DEFAULT_SCM_DELAY: Duration = Duration::from_millis(300);

    /// Default back-off after an HTTP 429.
    pub const DEFAULT_THROTTLE_BACKOFF: Duration = Duration::from_millis(5100);

    /// Default credential-validation timeout.
    pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parse = |s: &str| Url::parse(s).expect("default base URLs are valid");
        Self {
            qa_public_base: parse("https://api.stackexchange.com/2.3/"),
            qa_internal_base: parse("https://api.stackoverflowteams.com/2.3/"),
            qa_public_site: parse("https://stackoverflow.com/"),
            qa_internal_site: parse("https://stackoverflowteams.com/"),
            tracker_base: parse("https://dev.azure.com/"),
            qa_public_delay: Self::DEFAULT_QA_PUBLIC_DELAY,
            qa_internal_delay: Self::DEFAULT_QA_INTERNAL_DELAY,
            scm_delay: Self::DEFAULT_SCM_DELAY,
            throttle_backoff: Self::DEFAULT_THROTTLE_BACKOFF,
            validation_timeout: Self::DEFAULT_VALIDATION_TIMEOUT,
        }
    }
}

/// Parameters for one job, resolved from the request payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    /// Days to reach back, clamped to 1..=365.
    pub number_of_days_to_query: u16,
    /// Local hour of day the window starts at, clamped to 0..=23.
    pub start_hour: u8,
    /// Whether new issues are pushed to the tracker.
    pub push_to_tracker: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            number_of_days_to_query: 1,
            start_hour: 10,
            push_to_tracker: true,
        }
    }
}

impl QueryParams {
    pub(crate) fn clamped(mut self) -> Self {
        self.number_of_days_to_query = self.number_of_days_to_query.clamp(1, 365);
        self.start_hour = self.start_hour.min(23);
        self
    }
}

/// What a job asks the engine to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRequest {
    /// Which sources to poll.
    pub enabled_services: EnabledServices,
    /// Query parameters.
    pub params: QueryParams,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Work is ongoing.
    Running,
    /// The job ran to the end (possibly with per-source errors).
    Completed,
    /// The job was cancelled.
    Cancelled,
    /// The job died on an internal failure.
    Error,
}

impl JobStatus {
    /// True for any state other than `Running`.
    pub fn is_terminal(self) -> bool {
        self != JobStatus::Running
    }
}

/// Coarse progress through a job's enabled sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Sources completed so far.
    pub current: u32,
    /// Number of enabled sources.
    pub total: u32,
    /// The unit of work currently in flight (service, tag or repository).
    pub current_service: String,
}

/// A per-source failure surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceErrorEntry {
    /// Label of the upstream that failed.
    pub service: String,
    /// Human-readable message.
    pub message: String,
}

/// Terminal outcome of one source within a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServiceOutcome {
    /// The source ran to the end.
    Done {
        /// 200 when something was found/pushed, 204 when there was nothing.
        status: u16,
        /// Terminal report message.
        message: String,
    },
    /// The source failed; other sources may still have completed.
    Failed {
        /// Always the literal `"error"`.
        status: String,
        /// Human-readable message.
        message: String,
    },
}

/// Snapshot of a job as returned by polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    /// Job identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Terminal per-source outcomes, `None` while running or cancelled.
    pub result: Option<BTreeMap<String, ServiceOutcome>>,
    /// Per-source failures, attributed to the upstream that failed.
    pub service_errors: Vec<ServiceErrorEntry>,
    /// Fatal error message when `status` is `Error`.
    pub error: Option<String>,
    /// Progress through the enabled sources.
    pub progress: JobProgress,
    /// Milliseconds since the job started (stops advancing at termination).
    pub elapsed_time: u64,
}

/// One line of the job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Job identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Job start as unix milliseconds.
    pub started_epoch_ms: i64,
    /// Milliseconds since the job started (stops advancing at termination).
    pub elapsed_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_match_the_documented_ones() {
        let request: StartRequest = serde_json::from_str("{}").unwrap();
        assert!(request.enabled_services.qa_public);
        assert!(!request.enabled_services.qa_internal);
        assert!(request.enabled_services.scm_issues);
        assert_eq!(request.params.number_of_days_to_query, 1);
        assert_eq!(request.params.start_hour, 10);
        assert!(request.params.push_to_tracker);
    }

    #[test]
    fn request_fields_use_wire_names() {
        let request: StartRequest = serde_json::from_value(serde_json::json!({
            "enabledServices": { "qa_public": false, "qa_internal": true, "scm_issues": false },
            "params": { "numberOfDaysToQuery": 7, "startHour": 0, "pushToTracker": false }
        }))
        .unwrap();
        assert!(request.enabled_services.qa_internal);
        assert_eq!(request.params.number_of_days_to_query, 7);
        assert_eq!(request.params.start_hour, 0);
        assert!(!request.params.push_to_tracker);
    }

    #[test]
    fn params_are_clamped_into_range() {
        let params = QueryParams {
            number_of_days_to_query: 0,
            start_hour: 99,
            push_to_tracker: true,
        }
        .clamped();
        assert_eq!(params.number_of_days_to_query, 1);
        assert_eq!(params.start_hour, 23);

        let params = QueryParams {
            number_of_days_to_query: 9999,
            start_hour: 23,
            push_to_tracker: true,
        }
        .clamped();
        assert_eq!(params.number_of_days_to_query, 365);
    }

    #[test]
    fn job_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(JobStatus::Running).unwrap(),
            serde_json::json!("running")
        );
        assert_eq!(
            serde_json::to_value(JobStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn service_outcomes_keep_their_wire_shape() {
        let done = serde_json::to_value(ServiceOutcome::Done {
            status: 204,
            message: "No new posts found.".to_string(),
        })
        .unwrap();
        assert_eq!(done["status"], 204);

        let failed = serde_json::to_value(ServiceOutcome::Failed {
            status: "error".to_string(),
            message: "service unreachable".to_string(),
        })
        .unwrap();
        assert_eq!(failed["status"], "error");
    }
}
