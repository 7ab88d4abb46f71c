//! Canned upstream payloads served when the settings document enables
//! test-data mode. No network traffic happens in that mode; items flow
//! through the same normalization path and come out classified as new,
//! report-only.

use chrono::{Duration, Utc};

use crate::upstream::qa::QaQuestion;
use crate::upstream::scm::{LabelEvent, ScmIssue};

pub(crate) fn qa_questions(internal: bool) -> Vec<QaQuestion> {
    if internal {
        vec![QaQuestion {
            question_id: 90001,
            title: "Sample: proactive messages from an internal bot".to_string(),
        }]
    } else {
        vec![
            QaQuestion {
                question_id: 80001,
                title: "Sample: adaptive card actions not firing".to_string(),
            },
            QaQuestion {
                question_id: 80002,
                title: "Sample: OAuth prompt loops forever".to_string(),
            },
        ]
    }
}

pub(crate) fn scm_issues() -> Vec<ScmIssue> {
    let now = Utc::now();
    vec![
        ScmIssue {
            number: 7001,
            title: "Sample: adapter drops activities under load".to_string(),
            url: "https://github.com/contoso/botbuilder-js/issues/7001".to_string(),
            created_at: now - Duration::hours(2),
            repository: "botbuilder-js".to_string(),
            labels: vec!["support".to_string()],
            label_events: vec![LabelEvent {
                label: "support".to_string(),
                created_at: now - Duration::hours(1),
            }],
        },
        ScmIssue {
            number: 7002,
            title: "Sample: token refresh fails silently".to_string(),
            url: "https://github.com/contoso/botbuilder-dotnet/issues/7002".to_string(),
            created_at: now - Duration::hours(3),
            repository: "botbuilder-dotnet".to_string(),
            labels: Vec::new(),
            label_events: Vec::new(),
        },
    ]
}
