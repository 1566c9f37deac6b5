//! Request handling: inbound authentication, rate limiting, and the
//! debounced reprocessing loop around the synchronization engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use directory::TokenContext;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookConfig;
use crate::engine::{PassSummary, SyncEngine};
use crate::errors::WebhookError;
use crate::metrics_defs::{
    SYNC_REPROCESS_PASSES, WEBHOOK_RATE_LIMITED, WEBHOOK_REQUESTS, WEBHOOK_UNAUTHORIZED,
};
use crate::queue::WorkTable;
use crate::ratelimit::FixedWindowLimiter;

type HmacSha256 = Hmac<Sha256>;

/// Which entity kind the notification reports as edited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    PersonEdited,
    TaskEdited,
}

impl Trigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Trigger::PersonEdited => "person",
            Trigger::TaskEdited => "task",
        }
    }
}

#[derive(Debug)]
pub enum HandleOutcome {
    /// At least one pass ran; carries the summary of the last pass.
    Completed {
        summary: PassSummary,
        passes: u32,
        duration: Duration,
    },
    /// Another pass already owned this entity id; the edit was folded
    /// into its mandatory follow-up pass.
    Queued { entity_id: String },
}

pub struct SyncService {
    engine: SyncEngine,
    table: Arc<dyn WorkTable>,
    limiter: FixedWindowLimiter,
    shared_secret: String,
    settle_interval: Duration,
    max_reprocess_passes: u32,
}

impl SyncService {
    pub fn new(engine: SyncEngine, table: Arc<dyn WorkTable>, config: &WebhookConfig) -> Self {
        Self {
            engine,
            table,
            limiter: FixedWindowLimiter::new(
                config.rate_limit_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
            shared_secret: config.shared_secret.clone(),
            settle_interval: Duration::from_millis(config.settle_interval_ms),
            max_reprocess_passes: config.max_reprocess_passes,
        }
    }

    /// Handle one inbound edit notification end to end.
    pub async fn handle(
        &self,
        trigger: Trigger,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<HandleOutcome, WebhookError> {
        metrics::counter!(WEBHOOK_REQUESTS.name).increment(1);

        // Rate limit before any parsing; rejection is the only
        // backpressure.
        if !self.limiter.check() {
            metrics::counter!(WEBHOOK_RATE_LIMITED.name).increment(1);
            return Err(WebhookError::TooManyRequests);
        }

        self.verify_signature(authorization, body)?;

        let ctx = TokenContext::from_notification(body)?;

        if !self.table.enqueue(&ctx.entity_id) {
            tracing::info!(
                entity_id = %ctx.entity_id,
                trigger = trigger.as_str(),
                editor_id = %ctx.subject_id,
                editor = %ctx.subject_label,
                "pass already in flight, edit folded into its follow-up"
            );
            return Ok(HandleOutcome::Queued {
                entity_id: ctx.entity_id.to_string(),
            });
        }

        let started = Instant::now();
        let result = self.run_passes(trigger, &ctx).await;

        match result {
            Ok((summary, passes)) => {
                tracing::info!(
                    entity_id = %ctx.entity_id,
                    trigger = trigger.as_str(),
                    editor_id = %ctx.subject_id,
                    editor = %ctx.subject_label,
                    passes,
                    "notification reconciled"
                );
                Ok(HandleOutcome::Completed {
                    summary,
                    passes,
                    duration: started.elapsed(),
                })
            }
            Err(err) => {
                tracing::error!(
                    entity_id = %ctx.entity_id,
                    trigger = trigger.as_str(),
                    editor_id = %ctx.subject_id,
                    error = %err,
                    "reconciliation aborted"
                );
                Err(err)
            }
        }
    }

    /// Run reconciliation passes until no edit arrived mid-pass, the
    /// pass bound is hit, or a read fails. The table entry is always
    /// removed before returning, so an entity id can never be left
    /// permanently stuck.
    async fn run_passes(
        &self,
        trigger: Trigger,
        ctx: &TokenContext,
    ) -> Result<(PassSummary, u32), WebhookError> {
        let mut passes = 0u32;

        loop {
            passes += 1;

            let result = match trigger {
                Trigger::PersonEdited => {
                    self.engine
                        .propagate_from_person(&ctx.entity_id, &ctx.token)
                        .await
                }
                Trigger::TaskEdited => {
                    self.engine
                        .propagate_from_task(&ctx.entity_id, &ctx.token)
                        .await
                }
            };

            let summary = match result {
                Ok(summary) => summary,
                Err(err) => {
                    self.drain(ctx);
                    return Err(err);
                }
            };

            if !self.table.complete(&ctx.entity_id) {
                return Ok((summary, passes));
            }

            if passes >= self.max_reprocess_passes {
                tracing::warn!(
                    entity_id = %ctx.entity_id,
                    passes,
                    "reprocess bound reached, leaving remaining edits to the next notification"
                );
                self.drain(ctx);
                return Ok((summary, passes));
            }

            metrics::counter!(SYNC_REPROCESS_PASSES.name).increment(1);
            tracing::info!(
                entity_id = %ctx.entity_id,
                pass = passes + 1,
                "edit arrived mid-pass, reprocessing after settle interval"
            );
            tokio::time::sleep(self.settle_interval).await;
        }
    }

    /// Remove the table entry regardless of pending reprocess flags.
    fn drain(&self, ctx: &TokenContext) {
        while self.table.complete(&ctx.entity_id) {}
    }

    fn verify_signature(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let valid = authorization.is_some_and(|header| self.signature_matches(header, body));
        if !valid {
            metrics::counter!(WEBHOOK_UNAUTHORIZED.name).increment(1);
            return Err(WebhookError::Unauthorized);
        }
        Ok(())
    }

    /// Check a `rpcsignature rpc0:<hex>` header against the body's
    /// HMAC. The digest comparison goes through `Mac::verify_slice`,
    /// which is constant-time.
    fn signature_matches(&self, header: &str, body: &[u8]) -> bool {
        let Some(signature_hex) = header.strip_prefix("rpcsignature rpc0:") else {
            return false;
        };
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(self.shared_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(body);
        mac.verify_slice(&signature).is_ok()
    }
}

/// Signature header for a notification body, in the form
/// `rpcsignature rpc0:{hex(hmac_sha256(secret, body))}`.
pub fn expected_signature_header(shared_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(shared_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("rpcsignature rpc0:{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryWorkTable;
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use directory::{DirectoryClient, EntityId};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "test-secret";

    fn test_config() -> WebhookConfig {
        WebhookConfig {
            shared_secret: SECRET.into(),
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            settle_interval_ms: 10,
            max_reprocess_passes: 5,
        }
    }

    fn make_body(entity_id: &str) -> Vec<u8> {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-1","name":"Editor"}"#);
        let token = format!("e30.{payload}.sig");
        serde_json::to_vec(&serde_json::json!({
            "entity": {"_id": entity_id},
            "token": token,
        }))
        .unwrap()
    }

    fn service_for(server: &MockServer, table: Arc<dyn WorkTable>) -> SyncService {
        let engine = SyncEngine::new(DirectoryClient::new(Url::parse(&server.uri()).unwrap()));
        SyncService::new(engine, table, &test_config())
    }

    async fn mock_lonely_person(server: &MockServer, id: &str, expected_fetches: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/entities/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_id": id, "kind": "person",
            })))
            .expect(expected_fetches)
            .mount(server)
            .await;
    }

    /// Work table with scripted `complete` results, for driving the
    /// reprocessing loop deterministically.
    struct ScriptedTable {
        complete_results: Mutex<VecDeque<bool>>,
    }

    impl ScriptedTable {
        fn new(results: impl IntoIterator<Item = bool>) -> Self {
            Self {
                complete_results: Mutex::new(results.into_iter().collect()),
            }
        }
    }

    impl WorkTable for ScriptedTable {
        fn enqueue(&self, _id: &EntityId) -> bool {
            true
        }

        fn complete(&self, _id: &EntityId) -> bool {
            self.complete_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(false)
        }
    }

    #[tokio::test]
    async fn test_handle_completes_single_pass() {
        let server = MockServer::start().await;
        mock_lonely_person(&server, "P", 1).await;

        let service = service_for(&server, Arc::new(InMemoryWorkTable::new()));
        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        let outcome = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await
            .unwrap();

        match outcome {
            HandleOutcome::Completed { passes, summary, .. } => {
                assert_eq!(passes, 1);
                assert_eq!(summary.grants.total(), 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mid_pass_edit_forces_second_pass() {
        let server = MockServer::start().await;
        // One mid-pass edit: first complete says reprocess, second
        // says done. The engine must run exactly twice.
        mock_lonely_person(&server, "P", 2).await;

        let table = Arc::new(ScriptedTable::new([true, false]));
        let service = service_for(&server, table);
        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        let outcome = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await
            .unwrap();

        match outcome {
            HandleOutcome::Completed { passes, .. } => assert_eq!(passes, 2),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reprocess_bound_stops_unbounded_looping() {
        let server = MockServer::start().await;
        mock_lonely_person(&server, "P", 5).await;

        // Every pass reports another mid-pass edit; the bound caps it.
        let table = Arc::new(ScriptedTable::new(std::iter::repeat_n(true, 64)));
        let service = service_for(&server, table);
        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        let outcome = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await
            .unwrap();

        match outcome {
            HandleOutcome::Completed { passes, .. } => assert_eq!(passes, 5),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_in_flight_id_returns_queued() {
        let server = MockServer::start().await;

        let table = Arc::new(InMemoryWorkTable::new());
        // Another pass owns the id already.
        assert!(table.enqueue(&EntityId::from("P")));

        let service = service_for(&server, table.clone());
        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        let outcome = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await
            .unwrap();

        match outcome {
            HandleOutcome::Queued { entity_id } => assert_eq!(entity_id, "P"),
            other => panic!("expected Queued, got {other:?}"),
        }

        // The owner is now obliged to run a follow-up pass.
        assert!(table.complete(&EntityId::from("P")));
    }

    #[tokio::test]
    async fn test_pass_failure_cleans_up_queue_entry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/entities/P"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let table = Arc::new(InMemoryWorkTable::new());
        let service = service_for(&server, table.clone());
        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        let result = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await;
        assert!(matches!(result, Err(WebhookError::Remote { .. })));

        // The id must not be stuck: a fresh notification gets
        // ownership immediately.
        assert!(table.enqueue(&EntityId::from("P")));
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let server = MockServer::start().await;
        let service = service_for(&server, Arc::new(InMemoryWorkTable::new()));
        let body = make_body("P");

        let result = service
            .handle(
                Trigger::PersonEdited,
                Some("rpcsignature rpc0:deadbeef"),
                &body,
            )
            .await;
        assert!(matches!(result, Err(WebhookError::Unauthorized)));

        let result = service.handle(Trigger::PersonEdited, None, &body).await;
        assert!(matches!(result, Err(WebhookError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_truncated_or_malformed_signature_is_rejected() {
        let server = MockServer::start().await;
        let service = service_for(&server, Arc::new(InMemoryWorkTable::new()));
        let body = make_body("P");
        let valid = expected_signature_header(SECRET, &body);

        // Digest truncated to the wrong length.
        let truncated = &valid[..valid.len() - 2];
        // Digest that is not hex at all.
        let non_hex = "rpcsignature rpc0:zzzz";
        // Correct digest under the wrong header grammar.
        let wrong_prefix = valid.replacen("rpc0", "rpc1", 1);

        for header in [truncated, non_hex, wrong_prefix.as_str()] {
            let result = service
                .handle(Trigger::PersonEdited, Some(header), &body)
                .await;
            assert!(
                matches!(result, Err(WebhookError::Unauthorized)),
                "header {header:?} must be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let server = MockServer::start().await;
        let service = service_for(&server, Arc::new(InMemoryWorkTable::new()));

        let body = serde_json::to_vec(&serde_json::json!({"token": "a.b.c"})).unwrap();
        let auth = expected_signature_header(SECRET, &body);

        let result = service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await;
        assert!(matches!(result, Err(WebhookError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_queue_or_engine() {
        let server = MockServer::start().await;

        let engine = SyncEngine::new(DirectoryClient::new(Url::parse(&server.uri()).unwrap()));
        let mut config = test_config();
        config.rate_limit_requests = 1;
        let table = Arc::new(InMemoryWorkTable::new());
        let service = SyncService::new(engine, table.clone(), &config);

        mock_lonely_person(&server, "P", 1).await;

        let body = make_body("P");
        let auth = expected_signature_header(SECRET, &body);

        service
            .handle(Trigger::PersonEdited, Some(&auth), &body)
            .await
            .unwrap();

        // Budget spent: rejected without touching queue or engine,
        // even with a garbage signature.
        let result = service
            .handle(Trigger::PersonEdited, Some("nonsense"), &body)
            .await;
        assert!(matches!(result, Err(WebhookError::TooManyRequests)));
        assert!(table.enqueue(&EntityId::from("P")));
    }
}
