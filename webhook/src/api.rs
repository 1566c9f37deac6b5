//! HTTP surface: two webhook endpoints (one per trigger direction)
//! plus health/readiness probes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::engine::PassSummary;
use crate::errors::WebhookError;
use crate::handler::{HandleOutcome, SyncService, Trigger};

pub fn router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/webhooks/person-updated", post(person_updated))
        .route("/webhooks/task-updated", post(task_updated))
        .route("/health", get(health))
        .route("/ready", get(health))
        .with_state(service)
}

async fn person_updated(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    dispatch(service, Trigger::PersonEdited, headers, body).await
}

async fn task_updated(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    dispatch(service, Trigger::TaskEdited, headers, body).await
}

async fn health() -> &'static str {
    "ok\n"
}

async fn dispatch(
    service: Arc<SyncService>,
    trigger: Trigger,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    let outcome = service.handle(trigger, authorization, &body).await?;

    Ok(match outcome {
        HandleOutcome::Completed {
            summary,
            passes,
            duration,
        } => Json(completed_body(trigger, summary, passes, duration.as_millis())).into_response(),
        HandleOutcome::Queued { entity_id } => Json(serde_json::json!({
            "success": true,
            "queued": true,
            "entity_id": entity_id,
        }))
        .into_response(),
    })
}

fn completed_body(
    trigger: Trigger,
    summary: PassSummary,
    passes: u32,
    duration_ms: u128,
) -> serde_json::Value {
    // The related-entity count is named for what it holds, per
    // direction.
    let related_key = match trigger {
        Trigger::PersonEdited => "tasks_found",
        Trigger::TaskEdited => "persons_found",
    };

    let mut body = serde_json::json!({
        "success": true,
        "groups_found": summary.groups_found,
        "permissions_granted": summary.grants.successful,
        "permissions_skipped": summary.grants.skipped,
        "permissions_failed": summary.grants.failed,
        "passes": passes,
        "duration_ms": duration_ms as u64,
    });
    body[related_key] = summary.related_found.into();
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory::GrantResult;
    use std::time::Duration;

    #[test]
    fn test_completed_body_keys_follow_trigger() {
        let summary = PassSummary {
            groups_found: 2,
            related_found: 3,
            grants: GrantResult {
                successful: 3,
                skipped: 0,
                failed: 0,
            },
        };

        let body = completed_body(
            Trigger::PersonEdited,
            summary,
            1,
            Duration::from_millis(42).as_millis(),
        );
        assert_eq!(body["success"], true);
        assert_eq!(body["tasks_found"], 3);
        assert_eq!(body["permissions_granted"], 3);
        assert_eq!(body["duration_ms"], 42);
        assert!(body.get("persons_found").is_none());

        let body = completed_body(Trigger::TaskEdited, summary, 1, 0);
        assert_eq!(body["persons_found"], 3);
        assert!(body.get("tasks_found").is_none());
    }
}
