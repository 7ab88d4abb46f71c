//! Client for the Q&A question APIs (public and internal Stack Overflow).

use std::time::Duration;

use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use support_tracker_core::window::QueryWindow;

use crate::error::UpstreamError;

const PUBLIC_SITE_PARAM: &str = "stackoverflow";
const PUBLIC_USER_AGENT: &str = concat!("support-tracker-public/", env!("CARGO_PKG_VERSION"));
const INTERNAL_USER_AGENT: &str = concat!("support-tracker-internal/", env!("CARGO_PKG_VERSION"));

/// Which Q&A instance a request targets. Public requests carry the site
/// parameter and no key; internal requests carry the `X-API-Key` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QaRole {
    Public,
    Internal,
}

impl QaRole {
    fn user_agent(self) -> &'static str {
        match self {
            QaRole::Public => PUBLIC_USER_AGENT,
            QaRole::Internal => INTERNAL_USER_AGENT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct QaPage {
    #[serde(default)]
    pub(crate) items: Vec<QaQuestion>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub(crate) struct QaQuestion {
    pub(crate) question_id: u64,
    pub(crate) title: String,
}

/// Fetch one page of questions for a tag. A 429 answer is absorbed: after
/// `throttle_backoff` the tag yields an empty list rather than an error.
pub(crate) async fn fetch_questions(
    http: &reqwest::Client,
    base: &Url,
    role: QaRole,
    api_key: Option<&str>,
    tag: &str,
    window: QueryWindow,
    throttle_backoff: Duration,
) -> Result<Vec<QaQuestion>, UpstreamError> {
    let url = base
        .join("questions")
        .map_err(|e| UpstreamError::Internal(format!("bad Q&A base URL: {e}")))?;

    let fromdate = window.unix_seconds().to_string();
    let mut query: Vec<(&str, &str)> = vec![
        ("fromdate", fromdate.as_str()),
        ("filter", "withbody"),
        ("tagged", tag),
    ];
    if role == QaRole::Public {
        query.push(("site", PUBLIC_SITE_PARAM));
    }

    let mut req = http
        .get(url)
        .query(&query)
        .header(header::USER_AGENT, role.user_agent());
    if let Some(key) = api_key {
        req = req.header("X-API-Key", key);
    }

    let res = req.send().await.map_err(UpstreamError::from_transport)?;

    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        tokio::time::sleep(throttle_backoff).await;
        return Ok(Vec::new());
    }
    if !res.status().is_success() {
        return Err(UpstreamError::from_status(res.status()));
    }

    let page: QaPage = res
        .json()
        .await
        .map_err(|e| UpstreamError::Malformed(format!("{e}")))?;
    Ok(page.items)
}

/// Minimal keyed request used to validate internal Q&A credentials.
pub(crate) async fn validate_internal_key(
    http: &reqwest::Client,
    base: &Url,
    api_key: &str,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    let url = base
        .join("questions")
        .map_err(|e| UpstreamError::Internal(format!("bad Q&A base URL: {e}")))?;

    let res = http
        .get(url)
        .query(&[("pagesize", "1")])
        .header(header::USER_AGENT, INTERNAL_USER_AGENT)
        .header("X-API-Key", api_key)
        .timeout(timeout)
        .send()
        .await
        .map_err(UpstreamError::from_transport)?;

    if !res.status().is_success() {
        return Err(UpstreamError::from_status(res.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window() -> QueryWindow {
        QueryWindow::starting_at(1, 10, Local::now())
    }

    #[tokio::test]
    async fn public_fetch_sends_site_and_window() {
        let server = MockServer::start().await;
        let window = window();

        Mock::given(method("GET"))
            .and(path("/questions"))
            .and(query_param("site", "stackoverflow"))
            .and(query_param("filter", "withbody"))
            .and(query_param("tagged", "botframework"))
            .and(query_param("fromdate", window.unix_seconds().to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "question_id": 12345, "title": "T" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap().join("/").unwrap();
        let items = fetch_questions(
            &reqwest::Client::new(),
            &base,
            QaRole::Public,
            None,
            "botframework",
            window,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].question_id, 12345);
        assert_eq!(items[0].title, "T");
    }

    #[tokio::test]
    async fn internal_fetch_sends_key_and_no_site() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/questions"))
            .and(header("X-API-Key", "sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let items = fetch_questions(
            &reqwest::Client::new(),
            &base,
            QaRole::Internal,
            Some("sekrit"),
            "bots",
            window(),
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn throttle_yields_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/questions"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let items = fetch_questions(
            &reqwest::Client::new(),
            &base,
            QaRole::Public,
            None,
            "botframework",
            window(),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/questions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let err = fetch_questions(
            &reqwest::Client::new(),
            &base,
            QaRole::Public,
            None,
            "botframework",
            window(),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpstreamError::Server { status: 500 }));
    }

    #[tokio::test]
    async fn validate_maps_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/questions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let err = validate_internal_key(
            &reqwest::Client::new(),
            &base,
            "bad",
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
    }
}
