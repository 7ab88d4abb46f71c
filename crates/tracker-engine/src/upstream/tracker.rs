//! Client for the work-item tracker REST API (Azure DevOps).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::{Url, header};
use serde::{Deserialize, Serialize};
use support_tracker_core::NormalizedIssue;
use support_tracker_core::secrets::{SecretKey, SecretStore};
use support_tracker_core::settings::AzureDevOpsSettings;

use crate::error::UpstreamError;

/// A work-item reference from a WIQL query.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub(crate) struct WorkItemRef {
    pub(crate) id: u64,
    pub(crate) url: String,
}

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WorkItemRef>,
}

/// A full work item, with its fields as returned by the tracker.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WorkItem {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) fields: serde_json::Map<String, serde_json::Value>,
}

impl WorkItem {
    fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// The stored `System.Title`, empty when absent.
    pub(crate) fn title(&self) -> &str {
        self.field_str("System.Title").unwrap_or_default()
    }
}

/// The response to a work-item create.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub(crate) struct CreatedWorkItem {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PatchOp<'a> {
    op: &'static str,
    path: String,
    from: Option<&'static str>,
    value: &'a str,
}

/// A configured tracker client: base coordinates plus Basic auth material.
#[derive(Debug, Clone)]
pub(crate) struct TrackerClient {
    http: reqwest::Client,
    base: Url,
    org: String,
    project: String,
    api_version: String,
    auth: String,
}

impl TrackerClient {
    /// Build a client from settings and the secret store. The username may be
    /// empty; the token and the org/project coordinates may not.
    pub(crate) fn from_settings(
        http: &reqwest::Client,
        base: &Url,
        settings: &AzureDevOpsSettings,
        secrets: &dyn SecretStore,
    ) -> Result<Self, UpstreamError> {
        if settings.org.is_empty() || settings.project.is_empty() {
            return Err(UpstreamError::Configuration(
                "Azure DevOps organization/project are not configured".to_string(),
            ));
        }

        let username = secrets
            .get(SecretKey::TrackerUsername)
            .map_err(|e| UpstreamError::Configuration(format!("{e}")))?
            .unwrap_or_default();
        let token = secrets
            .get(SecretKey::TrackerPat)
            .map_err(|e| UpstreamError::Configuration(format!("{e}")))?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                UpstreamError::Configuration(
                    "Azure DevOps personal access token is not set".to_string(),
                )
            })?;

        Ok(Self::new(
            http,
            base,
            &settings.org,
            &settings.project,
            &settings.api_version,
            &username,
            &token,
        ))
    }

    pub(crate) fn new(
        http: &reqwest::Client,
        base: &Url,
        org: &str,
        project: &str,
        api_version: &str,
        username: &str,
        token: &str,
    ) -> Self {
        let auth = format!("Basic {}", B64.encode(format!("{username}:{token}")));
        Self {
            http: http.clone(),
            base: base.clone(),
            org: org.to_string(),
            project: project.to_string(),
            api_version: api_version.to_string(),
            auth,
        }
    }

    fn project_url(&self, tail: &str) -> Result<Url, UpstreamError> {
        self.base
            .join(&format!("{}/{}/_apis/{tail}", self.org, self.project))
            .map_err(|e| UpstreamError::Internal(format!("bad tracker URL: {e}")))
    }

    /// WIQL query for work items carrying the given upstream issue id.
    pub(crate) async fn search_work_item_by_issue_id(
        &self,
        issue_id: &str,
    ) -> Result<Vec<WorkItemRef>, UpstreamError> {
        let url = self.project_url("wit/wiql")?;
        let wiql = format!(
            "SELECT [System.Id],[System.Title],[System.State],[System.AssignedTo] \
             FROM workitems \
             WHERE [System.WorkItemType] = 'Issue' AND [Custom.IssueID] = '{}'",
            issue_id.replace('\'', "''")
        );

        let res = self
            .http
            .post(url)
            .query(&[("api-version", self.api_version.as_str())])
            .header(header::AUTHORIZATION, &self.auth)
            .json(&serde_json::json!({ "query": wiql }))
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        if !res.status().is_success() {
            return Err(UpstreamError::from_status(res.status()));
        }

        let body: WiqlResponse = res
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("{e}")))?;
        Ok(body.work_items)
    }

    /// Fetch a work item through the tracker-supplied URL, verbatim.
    pub(crate) async fn get_work_item_by_url(&self, url: &str) -> Result<WorkItem, UpstreamError> {
        let res = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, &self.auth)
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        if !res.status().is_success() {
            return Err(UpstreamError::from_status(res.status()));
        }

        res.json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("{e}")))
    }

    /// Create a work item mirroring a normalized issue.
    pub(crate) async fn add_work_item(
        &self,
        issue: &NormalizedIssue,
    ) -> Result<CreatedWorkItem, UpstreamError> {
        let url = self.project_url("wit/workitems/$Issue")?;
        let source_label = issue.source.label();
        let ops = [
            patch_op("System.Title", &issue.title),
            patch_op("System.Tags", &issue.tags),
            patch_op("Custom.IssueID", &issue.issue_id),
            patch_op("Custom.IssueType", source_label),
            patch_op("Custom.SDK", &issue.sdk),
            patch_op("Custom.Repository", &issue.repository),
            patch_op("Custom.IssueURL", &issue.url),
        ];

        let body = serde_json::to_string(&ops)
            .map_err(|e| UpstreamError::Internal(format!("serialize patch document: {e}")))?;
        let res = self
            .http
            .post(url)
            .query(&[("api-version", self.api_version.as_str())])
            .header(header::AUTHORIZATION, &self.auth)
            .header(header::CONTENT_TYPE, "application/json-patch+json")
            .body(body)
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        if !res.status().is_success() {
            return Err(UpstreamError::from_status(res.status()));
        }

        res.json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("{e}")))
    }

    /// Minimal authenticated request used to validate the credentials.
    pub(crate) async fn validate(&self, timeout: Duration) -> Result<(), UpstreamError> {
        let url = self
            .base
            .join(&format!("{}/_apis/projects", self.org))
            .map_err(|e| UpstreamError::Internal(format!("bad tracker URL: {e}")))?;

        let res = self
            .http
            .get(url)
            .query(&[("$top", "1"), ("api-version", self.api_version.as_str())])
            .header(header::AUTHORIZATION, &self.auth)
            .timeout(timeout)
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        if !res.status().is_success() {
            return Err(UpstreamError::from_status(res.status()));
        }
        Ok(())
    }
}

fn patch_op<'a>(field: &str, value: &'a str) -> PatchOp<'a> {
    PatchOp {
        op: "add",
        path: format!("/fields/{field}"),
        from: None,
        value,
    }
}
