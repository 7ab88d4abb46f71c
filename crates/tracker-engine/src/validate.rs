//! Credential validation, both the pre-job gate and the one-shot checks the
//! control plane exposes.

use std::time::Duration;

use reqwest::Url;
use support_tracker_core::secrets::SecretStore;
use support_tracker_core::settings::{AzureDevOpsSettings, Settings};
use tokio_util::sync::CancellationToken;

use crate::error::{Service, SourceFailure, UpstreamError};
use crate::reconcile::guarded;
use crate::upstream::tracker::TrackerClient;
use crate::upstream::{qa, scm};

/// Validate work-item tracker credentials with an explicit username/token.
pub async fn check_tracker(
    http: &reqwest::Client,
    base: &Url,
    org: &str,
    project: &str,
    api_version: &str,
    username: &str,
    token: &str,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    if org.is_empty() || project.is_empty() {
        return Err(UpstreamError::Configuration(
            "Azure DevOps organization/project are not configured".to_string(),
        ));
    }
    if token.is_empty() {
        return Err(UpstreamError::Configuration(
            "Azure DevOps personal access token is not set".to_string(),
        ));
    }
    TrackerClient::new(http, base, org, project, api_version, username, token)
        .validate(timeout)
        .await
}

/// Validate work-item tracker credentials from settings and the secret store.
pub async fn check_tracker_stored(
    http: &reqwest::Client,
    base: &Url,
    settings: &AzureDevOpsSettings,
    secrets: &dyn SecretStore,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    TrackerClient::from_settings(http, base, settings, secrets)?
        .validate(timeout)
        .await
}

/// Validate an SCM token with a minimal authenticated request.
pub async fn check_scm(
    http: &reqwest::Client,
    api_url: &str,
    token: &str,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    if token.is_empty() {
        return Err(UpstreamError::Configuration(
            "SCM token is not set".to_string(),
        ));
    }
    scm::validate_token(http, api_url, token, timeout).await
}

/// Validate an internal Q&A API key with a minimal keyed request.
pub async fn check_qa_internal(
    http: &reqwest::Client,
    base: &Url,
    api_key: &str,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    if api_key.is_empty() {
        return Err(UpstreamError::Configuration(
            "internal Q&A API key is not set".to_string(),
        ));
    }
    qa::validate_internal_key(http, base, api_key, timeout).await
}

/// The pre-job credential gate: one tracker validation before any fetch.
/// Failures are attributed to the tracker so the caller can surface them.
pub(crate) async fn preflight(
    http: &reqwest::Client,
    tracker_base: &Url,
    settings: &Settings,
    secrets: &dyn SecretStore,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<(), SourceFailure> {
    guarded(
        token,
        check_tracker_stored(http, tracker_base, &settings.azure_dev_ops, secrets, timeout),
    )
    .await
    .map_err(|e| SourceFailure::new(Service::WorkTracker, e))
}
