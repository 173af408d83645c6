//! The routing collaborator's interface boundary. Backend-selection policy
//! itself is out of scope; this crate only defines the trait the gateway
//! calls into and a trivial reference implementation for tests and the
//! standalone binary.

use async_trait::async_trait;
use sqlrelay_classifier::QueryTag;

/// What the routing collaborator decided to do with a classified
/// statement.
pub enum BackendDecision {
    /// Forward the statement to the named backend.
    Route { backend: String },
    /// Answer locally without touching a backend (e.g. `SELECT @@version_comment`).
    AnswerLocally { response: Vec<u8> },
    /// Refuse the statement; `message` becomes an error packet.
    Reject { message: String },
}

#[async_trait]
pub trait RoutingPolicy: Send + Sync {
    async fn decide(&self, sql: &str, tag: QueryTag, session_user: &str) -> BackendDecision;
}

/// Always routes everything to one fixed backend name, regardless of tag.
/// Exists so the gateway binary and its tests have something concrete to
/// wire in; real backend-selection policy lives outside this core.
pub struct SingleBackendPolicy {
    backend: String,
}

impl SingleBackendPolicy {
    pub fn new(backend: impl Into<String>) -> Self {
        SingleBackendPolicy {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl RoutingPolicy for SingleBackendPolicy {
    async fn decide(&self, _sql: &str, tag: QueryTag, _session_user: &str) -> BackendDecision {
        if tag.contains(QueryTag::LOCAL_READ) {
            BackendDecision::AnswerLocally {
                response: Vec::new(),
            }
        } else {
            BackendDecision::Route {
                backend: self.backend.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_non_local_statements_to_the_fixed_backend() {
        let policy = SingleBackendPolicy::new("primary");
        match policy.decide("SELECT 1", QueryTag::READ, "alice").await {
            BackendDecision::Route { backend } => assert_eq!(backend, "primary"),
            _ => panic!("expected Route"),
        }
    }

    #[tokio::test]
    async fn answers_local_read_without_a_backend() {
        let policy = SingleBackendPolicy::new("primary");
        match policy
            .decide("SELECT @@version_comment", QueryTag::LOCAL_READ, "alice")
            .await
        {
            BackendDecision::AnswerLocally { .. } => {}
            _ => panic!("expected AnswerLocally"),
        }
    }
}
