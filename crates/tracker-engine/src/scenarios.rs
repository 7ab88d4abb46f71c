//! End-to-end scenarios: the scheduler and reconcilers run against
//! mock upstreams through the public API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::{Value, json};
use support_tracker_core::report::ReportStore;
use support_tracker_core::secrets::{SecretKey, SecretStore};
use support_tracker_core::settings::{EnabledServices, RepoSpec, SettingsStore};
use support_tracker_core::{MemorySecretStore, SourceKind};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{EngineConfig, JobStatus, JobView, QueryParams, Scheduler, StartRequest};

struct Harness {
    _dir: tempfile::TempDir,
    reports: ReportStore,
    scheduler: Scheduler,
    qa: MockServer,
    scm: MockServer,
    tracker: MockServer,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let qa = MockServer::start().await;
        let scm = MockServer::start().await;
        let tracker = MockServer::start().await;

        let settings = SettingsStore::new(dir.path().join("settings.json"));
        let mut doc = settings.load().unwrap();
        doc.azure_dev_ops.org = "contoso".to_string();
        doc.azure_dev_ops.project = "support".to_string();
        doc.github.api_url = scm.uri();
        doc.repositories.stack_overflow = vec!["botframework".to_string()];
        doc.repositories.internal_stack_overflow = vec!["bots".to_string()];
        doc.repositories.github = vec![RepoSpec {
            repo: "contoso/botbuilder-js".to_string(),
            label: Some("support".to_string()),
            exclude_labels: Vec::new(),
        }];
        settings.save(&doc).unwrap();

        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::with([
            (SecretKey::TrackerPat, "pat123".to_string()),
            (SecretKey::ScmToken, "ghp_tok".to_string()),
            (SecretKey::QaInternalKey, "key123".to_string()),
        ]));

        let reports = ReportStore::new(dir.path().join("report.json"));

        let config = EngineConfig {
            qa_public_base: Url::parse(&qa.uri()).unwrap(),
            qa_internal_base: Url::parse(&qa.uri()).unwrap(),
            tracker_base: Url::parse(&tracker.uri()).unwrap(),
            qa_public_delay: Duration::ZERO,
            qa_internal_delay: Duration::ZERO,
            scm_delay: Duration::ZERO,
            throttle_backoff: Duration::from_millis(10),
            validation_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };

        let scheduler = Scheduler::new(settings.clone(), secrets, reports.clone(), config).unwrap();

        Self {
            _dir: dir,
            reports,
            scheduler,
            qa,
            scm,
            tracker,
        }
    }

    fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(self._dir.path().join("settings.json"))
    }

    async fn mount_tracker_validation(&self) {
        Mock::given(method("GET"))
            .and(path("/contoso/_apis/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 1 })))
            .mount(&self.tracker)
            .await;
    }

    async fn expect_no_creates(&self) {
        Mock::given(method("POST"))
            .and(path("/contoso/support/_apis/wit/workitems/$Issue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
            .expect(0)
            .mount(&self.tracker)
            .await;
    }

    async fn run(&self, enabled: EnabledServices, params: QueryParams) -> JobView {
        let id = self.scheduler.start(StartRequest {
            enabled_services: enabled,
            params,
        });
        self.wait(id).await
    }

    async fn wait(&self, id: Uuid) -> JobView {
        for _ in 0..400 {
            let view = self.scheduler.get(id).expect("job exists");
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job did not terminate in time");
    }
}

fn only(kind: SourceKind) -> EnabledServices {
    EnabledServices {
        qa_public: kind == SourceKind::QaPublic,
        qa_internal: kind == SourceKind::QaInternal,
        scm_issues: kind == SourceKind::ScmIssues,
    }
}

fn outcome(view: &JobView, key: &str) -> Value {
    let result = view.result.as_ref().expect("job has a result");
    serde_json::to_value(result.get(key).expect("source outcome present")).unwrap()
}

#[tokio::test]
async fn scenario_all_empty() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;
    h.expect_no_creates().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&h.qa)
        .await;

    let view = h
        .run(only(SourceKind::QaPublic), QueryParams::default())
        .await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.service_errors.is_empty());
    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["status"], 204);
    assert_eq!(so["message"], "No new posts found.");

    let doc = h.reports.load().unwrap();
    assert_eq!(doc.index.stack_overflow.found.count, 0);
    assert!(doc.index.start_time.is_some());
    assert!(doc.index.end_time.is_some());
}

#[tokio::test]
async fn scenario_one_new_item_is_pushed() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "question_id": 12345, "title": "T", "body": "B" }]
        })))
        .mount(&h.qa)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workItems": [] })))
        .expect(1)
        .mount(&h.tracker)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/workitems/$Issue"))
        .and(body_string_contains("Custom.IssueID"))
        .and(body_string_contains("12345"))
        .and(body_string_contains("\"T\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 31 })))
        .expect(1)
        .mount(&h.tracker)
        .await;

    let view = h
        .run(only(SourceKind::QaPublic), QueryParams::default())
        .await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.service_errors.is_empty());
    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["status"], 200);

    let doc = h.reports.load().unwrap();
    assert_eq!(doc.index.stack_overflow.found.count, 1);
    assert!(doc.index.stack_overflow.dev_ops.is_empty());
    assert_eq!(doc.index.stack_overflow.new_issues.count, 1);
    assert_eq!(doc.index.stack_overflow.new_issues.issues[0].issue_id, "12345");
    assert_eq!(doc.index.stack_overflow.new_issues.issues[0].title, "T");
}

#[tokio::test]
async fn scenario_existing_match_suppresses_create() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;
    h.expect_no_creates().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "question_id": 999, "title": "Existing" }]
        })))
        .mount(&h.qa)
        .await;

    let wi_url = format!("{}/wi/1", h.tracker.uri());
    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workItems": [{ "id": 1, "url": wi_url }]
        })))
        .mount(&h.tracker)
        .await;

    Mock::given(method("GET"))
        .and(path("/wi/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "fields": { "Custom.IssueID": "999", "System.Title": "Existing" }
        })))
        .mount(&h.tracker)
        .await;

    let view = h
        .run(only(SourceKind::QaPublic), QueryParams::default())
        .await;

    assert_eq!(view.status, JobStatus::Completed);
    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["status"], 204);
    assert_eq!(so["message"], "No new posts to add");

    let doc = h.reports.load().unwrap();
    assert_eq!(doc.index.stack_overflow.new_issues.count, 0);
    assert_eq!(doc.index.stack_overflow.dev_ops.len(), 1);
    assert_eq!(doc.index.stack_overflow.dev_ops[0].issue_id, "999");
    assert_eq!(doc.index.stack_overflow.dev_ops[0].title, "Existing");
}

#[tokio::test]
async fn scenario_title_drift_triggers_create() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "question_id": 999, "title": "Existing" }]
        })))
        .mount(&h.qa)
        .await;

    let wi_url = format!("{}/wi/1", h.tracker.uri());
    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workItems": [{ "id": 1, "url": wi_url }]
        })))
        .mount(&h.tracker)
        .await;

    Mock::given(method("GET"))
        .and(path("/wi/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "fields": { "Custom.IssueID": "999", "System.Title": "Different" }
        })))
        .mount(&h.tracker)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/workitems/$Issue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 32 })))
        .expect(1)
        .mount(&h.tracker)
        .await;

    let view = h
        .run(only(SourceKind::QaPublic), QueryParams::default())
        .await;

    assert_eq!(view.status, JobStatus::Completed);
    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["status"], 200);

    let doc = h.reports.load().unwrap();
    // The hit is recorded and the re-titled issue is still treated as new.
    assert_eq!(doc.index.stack_overflow.dev_ops.len(), 1);
    assert_eq!(doc.index.stack_overflow.dev_ops[0].title, "Different");
    assert_eq!(doc.index.stack_overflow.new_issues.count, 1);
}

#[tokio::test]
async fn scenario_scm_throttle_then_support_label() {
    let h = Harness::new().await;

    // Two repositories: the first only ever answers 429, the second returns a
    // freshly support-labelled issue.
    let settings = h.settings_store();
    let mut doc = settings.load().unwrap();
    doc.repositories.github = vec![
        RepoSpec {
            repo: "contoso/repo-one-python".to_string(),
            label: None,
            exclude_labels: Vec::new(),
        },
        RepoSpec {
            repo: "contoso/botbuilder-js".to_string(),
            label: Some("support".to_string()),
            exclude_labels: Vec::new(),
        },
    ];
    settings.save(&doc).unwrap();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("repo-one-python"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&h.scm)
        .await;

    // No "repository" node in the response: the repository short-name must
    // come from the configured repo slug instead.
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("botbuilder-js"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "search": { "nodes": [{
                "number": 42,
                "title": "Adapter drops activities",
                "url": "https://github.com/contoso/botbuilder-js/issues/42",
                "createdAt": chrono::Utc::now().to_rfc3339(),
                "labels": { "nodes": [{ "name": "support" }] },
                "timelineItems": { "nodes": [
                    { "createdAt": chrono::Utc::now().to_rfc3339(), "label": { "name": "support" } }
                ] }
            }] } }
        })))
        .expect(1)
        .mount(&h.scm)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workItems": [] })))
        .mount(&h.tracker)
        .await;
    h.expect_no_creates().await;

    let params = QueryParams {
        push_to_tracker: false,
        ..QueryParams::default()
    };
    let view = h.run(only(SourceKind::ScmIssues), params).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.service_errors.is_empty());
    let gh = outcome(&view, "github");
    assert_eq!(gh["status"], 200);
    assert_eq!(gh["message"], "1 new issue(s) found but not pushed");

    let doc = h.reports.load().unwrap();
    assert_eq!(doc.index.github.new_issues.count, 1);
    let issue = &doc.index.github.new_issues.issues[0];
    assert_eq!(issue.tags, "[Support Labelled]");
    assert_eq!(issue.sdk, "Node");
    assert_eq!(issue.repository, "botbuilder-js");
}

#[tokio::test]
async fn scenario_cancellation_mid_flight() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;
    h.expect_no_creates().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "question_id": 555, "title": "Pending" }]
        })))
        .mount(&h.qa)
        .await;

    // The lookup stalls long enough for the cancel to land mid-flight.
    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "workItems": [] }))
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&h.tracker)
        .await;

    let id = h.scheduler.start(StartRequest {
        enabled_services: only(SourceKind::QaPublic),
        params: QueryParams::default(),
    });

    // Wait until the fetch result has been persisted, then cancel.
    for _ in 0..400 {
        if h.reports.load().unwrap().index.stack_overflow.found.count == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(h.reports.load().unwrap().index.stack_overflow.found.count, 1);

    use crate::CancelResult;
    assert_eq!(h.scheduler.cancel(id), CancelResult::Cancelled);

    let view = h.wait(id).await;
    assert_eq!(view.status, JobStatus::Cancelled);
    assert!(view.service_errors.is_empty());
    assert!(view.result.is_none());

    let doc = h.reports.load().unwrap();
    assert_eq!(doc.index.stack_overflow.found.count, 1);
    assert_eq!(doc.index.stack_overflow.new_issues.count, 0);

    // Cancelling again reports the job as already terminated.
    assert_eq!(h.scheduler.cancel(id), CancelResult::AlreadyTerminal);
}

#[tokio::test]
async fn push_disabled_makes_no_create_calls() {
    let h = Harness::new().await;
    h.expect_no_creates().await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "question_id": 777, "title": "New one" }]
        })))
        .mount(&h.qa)
        .await;

    Mock::given(method("POST"))
        .and(path("/contoso/support/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workItems": [] })))
        .mount(&h.tracker)
        .await;

    let params = QueryParams {
        push_to_tracker: false,
        ..QueryParams::default()
    };
    let view = h.run(only(SourceKind::QaPublic), params).await;

    assert_eq!(view.status, JobStatus::Completed);
    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["message"], "1 new issue(s) found but not pushed");
}

#[tokio::test]
async fn credential_failure_prevents_all_fetches() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.tracker)
        .await;

    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(0)
        .mount(&h.qa)
        .await;

    let view = h
        .run(only(SourceKind::QaPublic), QueryParams::default())
        .await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.service_errors.len(), 1);
    assert_eq!(view.service_errors[0].service, "Azure DevOps");
    assert_eq!(view.result.as_ref().map(|r| r.len()), Some(0));
}

#[tokio::test]
async fn failed_source_does_not_hide_the_others() {
    let h = Harness::new().await;
    h.mount_tracker_validation().await;
    h.expect_no_creates().await;

    // Public Q&A errors out; GitHub comes back clean and empty.
    Mock::given(method("GET"))
        .and(path("/questions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.qa)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "search": { "nodes": [] } }
        })))
        .mount(&h.scm)
        .await;

    let enabled = EnabledServices {
        qa_public: true,
        qa_internal: false,
        scm_issues: true,
    };
    let view = h.run(enabled, QueryParams::default()).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress.current, 2);
    assert_eq!(view.progress.total, 2);
    assert_eq!(view.service_errors.len(), 1);
    assert_eq!(view.service_errors[0].service, "Stack Overflow");

    let so = outcome(&view, "stackOverflow");
    assert_eq!(so["status"], "error");
    let gh = outcome(&view, "github");
    assert_eq!(gh["status"], 204);
    assert_eq!(gh["message"], "No new issues found.");
}

#[tokio::test]
async fn test_data_mode_skips_validation_and_push() {
    let h = Harness::new().await;

    let settings = h.settings_store();
    let mut doc = settings.load().unwrap();
    doc.use_test_data = true;
    settings.save(&doc).unwrap();

    // No mocks are mounted anywhere: any request would fail the job.
    let enabled = EnabledServices {
        qa_public: true,
        qa_internal: true,
        scm_issues: true,
    };
    let view = h.run(enabled, QueryParams::default()).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.service_errors.is_empty());

    let doc = h.reports.load().unwrap();
    assert!(doc.index.stack_overflow.found.count > 0);
    assert!(doc.index.github.found.count > 0);
    assert_eq!(
        doc.index.github.new_issues.count,
        doc.index.github.found.count
    );
}
