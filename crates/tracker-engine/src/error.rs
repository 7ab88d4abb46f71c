//! Error taxonomy for upstream interactions, plus service attribution.

use reqwest::StatusCode;

/// The upstream a failure is attributed to. Errors raised while talking to
/// the work-item tracker keep the tracker's label even when they surface
/// inside a Q&A or SCM reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Public Q&A (Stack Overflow).
    QaPublic,
    /// Internal Q&A instance.
    QaInternal,
    /// SCM issues (GitHub).
    ScmIssues,
    /// The work-item tracker (Azure DevOps).
    WorkTracker,
}

impl Service {
    /// Human-readable service label.
    pub fn label(self) -> &'static str {
        match self {
            Service::QaPublic => "Stack Overflow",
            Service::QaInternal => "Internal Stack Overflow",
            Service::ScmIssues => "GitHub",
            Service::WorkTracker => "Azure DevOps",
        }
    }
}

impl From<support_tracker_core::SourceKind> for Service {
    fn from(kind: support_tracker_core::SourceKind) -> Self {
        match kind {
            support_tracker_core::SourceKind::QaPublic => Service::QaPublic,
            support_tracker_core::SourceKind::QaInternal => Service::QaInternal,
            support_tracker_core::SourceKind::ScmIssues => Service::ScmIssues,
        }
    }
}

/// Why an upstream interaction failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Cancellation observed at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,
    /// DNS or connection failure.
    #[error("service unreachable: {0}")]
    Unavailable(String),
    /// 401 or 403.
    #[error("{0}")]
    Auth(String),
    /// 404 of an addressable resource.
    #[error("resource not found")]
    NotFound,
    /// 429 where it is not absorbed inline.
    #[error("request throttled (HTTP 429)")]
    Throttled,
    /// 2xx with a schema-invalid body.
    #[error("unexpected response shape: {0}")]
    Malformed(String),
    /// Any other 4xx/5xx.
    #[error("service returned HTTP {status}")]
    Server {
        /// The HTTP status code.
        status: u16,
    },
    /// Missing or empty credentials and similar local misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An invariant violation; never user-caused.
    #[error("internal error: {0}")]
    Internal(String),
}

impl UpstreamError {
    /// Classify a non-success HTTP status.
    pub(crate) fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => UpstreamError::Auth("credentials are invalid or expired".to_string()),
            403 => UpstreamError::Auth("credentials lack the required permissions".to_string()),
            404 => UpstreamError::NotFound,
            429 => UpstreamError::Throttled,
            s => UpstreamError::Server { status: s },
        }
    }

    /// Classify a transport-level failure.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            UpstreamError::Unavailable(format!("{err}"))
        } else if err.is_decode() {
            UpstreamError::Malformed(format!("{err}"))
        } else {
            UpstreamError::Unavailable(format!("{err}"))
        }
    }
}

/// A reconciler failure, attributed to the upstream that actually failed.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    /// The failing upstream.
    pub service: Service,
    /// What went wrong.
    pub error: UpstreamError,
}

impl SourceFailure {
    pub(crate) fn new(service: Service, error: UpstreamError) -> Self {
        Self { service, error }
    }

    /// True when the underlying error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, UpstreamError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            UpstreamError::from_status(StatusCode::UNAUTHORIZED),
            UpstreamError::Auth(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::FORBIDDEN),
            UpstreamError::Auth(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::NOT_FOUND),
            UpstreamError::NotFound
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS),
            UpstreamError::Throttled
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::BAD_GATEWAY),
            UpstreamError::Server { status: 502 }
        ));
    }

    #[test]
    fn tracker_label_is_distinct_from_sources() {
        assert_eq!(Service::WorkTracker.label(), "Azure DevOps");
        assert_eq!(
            Service::from(support_tracker_core::SourceKind::QaInternal).label(),
            "Internal Stack Overflow"
        );
    }
}
