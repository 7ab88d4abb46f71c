//! Client for the SCM issue search (GitHub GraphQL).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use support_tracker_core::settings::RepoSpec;
use support_tracker_core::window::QueryWindow;

use crate::error::UpstreamError;

const USER_AGENT: &str = concat!("support-tracker/", env!("CARGO_PKG_VERSION"));

// One search per (repo, label); `last: 100` is the ceiling per request and
// no pagination is performed.
const SEARCH_QUERY: &str = r#"query($q: String!) {
  search(query: $q, type: ISSUE, last: 100) {
    nodes {
      ... on Issue {
        number
        title
        url
        createdAt
        repository { name }
        labels(first: 50) { nodes { name } }
        timelineItems(itemTypes: [LABELED_EVENT], last: 100) {
          nodes { ... on LabeledEvent { createdAt label { name } } }
        }
      }
    }
  }
}"#;

/// One open issue returned by the search, flattened out of the GraphQL shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScmIssue {
    pub(crate) number: u64,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) repository: String,
    pub(crate) labels: Vec<String>,
    pub(crate) label_events: Vec<LabelEvent>,
}

/// A `LabeledEvent` from the issue's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelEvent {
    pub(crate) label: String,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GraphRoot {
    data: Option<GraphData>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    search: GraphSearch,
}

#[derive(Debug, Deserialize)]
struct GraphSearch {
    #[serde(default)]
    nodes: Vec<GraphIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphIssue {
    number: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    repository: Option<GraphRepo>,
    labels: Option<GraphNodes<GraphLabel>>,
    timeline_items: Option<GraphNodes<GraphTimelineItem>>,
}

#[derive(Debug, Deserialize)]
struct GraphRepo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GraphNodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GraphLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphTimelineItem {
    created_at: Option<DateTime<Utc>>,
    label: Option<GraphLabel>,
}

/// Build the issue-search string for one (repo, label) request.
pub(crate) fn build_search(repo: &RepoSpec, window: QueryWindow) -> String {
    let mut parts = vec![
        format!("repo:{}", repo.repo),
        "is:open".to_string(),
        "is:issue".to_string(),
    ];
    if let Some(label) = &repo.label {
        parts.push(format!("label:\"{label}\""));
    }
    parts.push(format!("created:>{}", window.iso8601()));
    for excluded in &repo.exclude_labels {
        parts.push(format!("-label:\"{excluded}\""));
    }
    parts.join(" ")
}

/// Run one issue search. A 429 answer is absorbed: after `throttle_backoff`
/// the repository yields an empty list rather than an error.
pub(crate) async fn fetch_issues(
    http: &reqwest::Client,
    api_url: &str,
    token: &str,
    repo: &RepoSpec,
    window: QueryWindow,
    throttle_backoff: Duration,
) -> Result<Vec<ScmIssue>, UpstreamError> {
    let endpoint = graphql_endpoint(api_url)?;
    let body = serde_json::json!({
        "query": SEARCH_QUERY,
        "variables": { "q": build_search(repo, window) },
    });

    let res = http
        .post(endpoint)
        .bearer_auth(token)
        .header(header::USER_AGENT, USER_AGENT)
        .json(&body)
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;

    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        tokio::time::sleep(throttle_backoff).await;
        return Ok(Vec::new());
    }
    if !res.status().is_success() {
        return Err(UpstreamError::from_status(res.status()));
    }

    let root: GraphRoot = res
        .json()
        .await
        .map_err(|e| UpstreamError::Malformed(format!("{e}")))?;

    if let Some(err) = root.errors.first() {
        return Err(UpstreamError::Malformed(err.message.clone()));
    }
    let Some(data) = root.data else {
        return Err(UpstreamError::Malformed("response has no data".to_string()));
    };

    data.search.nodes.into_iter().map(flatten_issue).collect()
}

fn flatten_issue(node: GraphIssue) -> Result<ScmIssue, UpstreamError> {
    let number = node
        .number
        .ok_or_else(|| UpstreamError::Malformed("issue node missing number".to_string()))?;
    let title = node
        .title
        .ok_or_else(|| UpstreamError::Malformed("issue node missing title".to_string()))?;
    let url = node
        .url
        .ok_or_else(|| UpstreamError::Malformed("issue node missing url".to_string()))?;
    let created_at = node
        .created_at
        .ok_or_else(|| UpstreamError::Malformed("issue node missing createdAt".to_string()))?;

    let labels = node
        .labels
        .map(|l| l.nodes.into_iter().map(|n| n.name).collect())
        .unwrap_or_default();
    let label_events = node
        .timeline_items
        .map(|t| {
            t.nodes
                .into_iter()
                .filter_map(|item| {
                    Some(LabelEvent {
                        label: item.label?.name,
                        created_at: item.created_at?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ScmIssue {
        number,
        title,
        url,
        created_at,
        repository: node.repository.map(|r| r.name).unwrap_or_default(),
        labels,
        label_events,
    })
}

/// Minimal authenticated request used to validate the SCM token. The REST
/// and GraphQL paths accept the same token.
pub(crate) async fn validate_token(
    http: &reqwest::Client,
    api_url: &str,
    token: &str,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    let base = Url::parse(api_url)
        .map_err(|e| UpstreamError::Configuration(format!("invalid SCM API URL: {e}")))?;
    let url = base
        .join("user")
        .map_err(|e| UpstreamError::Configuration(format!("invalid SCM API URL: {e}")))?;

    let res = http
        .get(url)
        .bearer_auth(token)
        .header(header::USER_AGENT, USER_AGENT)
        .timeout(timeout)
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;

    if !res.status().is_success() {
        return Err(UpstreamError::from_status(res.status()));
    }
    Ok(())
}

fn graphql_endpoint(api_url: &str) -> Result<Url, UpstreamError> {
    let trimmed = api_url.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/graphql"))
        .map_err(|e| UpstreamError::Configuration(format!("invalid SCM API URL: {e}")))
}
