//! Token context extraction for inbound edit notifications.
//!
//! The notifying system relays the editing user's short-lived signed
//! token alongside the edited entity's id. The token is decoded
//! structurally (three dot-separated segments, base64url JSON claims)
//! so the subject's identity can be attached to downstream calls; the
//! signature is deliberately not verified here — authenticity is
//! delegated to the fact that the token is relayed by the notifying
//! system itself. A verification step would slot into
//! [`TokenContext::from_notification`] without touching the rest of
//! the pipeline.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::types::EntityId;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("notification payload is missing the entity id")]
    MalformedPayload,

    #[error("notification payload carries no credential")]
    MissingCredential,

    #[error("relayed token is not structurally valid: {0}")]
    MalformedToken(String),
}

/// Everything the reconciliation pipeline needs from one notification.
#[derive(Clone, Debug)]
pub struct TokenContext {
    pub entity_id: EntityId,
    /// The relayed bearer credential, forwarded verbatim on every
    /// outbound call so the store attributes changes to the real
    /// editor rather than a service identity.
    pub token: String,
    pub subject_id: String,
    pub subject_label: String,
}

#[derive(Deserialize)]
struct Notification {
    entity: Option<NotificationEntity>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct NotificationEntity {
    #[serde(rename = "_id")]
    id: Option<String>,
}

// Expiry is enforced server-side by the entity store on every
// forwarded call; only the editor's identity is read here.
#[derive(Deserialize)]
struct Claims {
    #[serde(alias = "userId")]
    sub: Option<String>,
    name: Option<String>,
}

impl TokenContext {
    /// Parse a raw notification body and decode the relayed token's
    /// claims. Pure and local; no network calls.
    pub fn from_notification(body: &[u8]) -> Result<Self, TokenError> {
        let notification: Notification =
            serde_json::from_slice(body).map_err(|_| TokenError::MalformedPayload)?;

        let entity_id = notification
            .entity
            .and_then(|e| e.id)
            .filter(|id| !id.is_empty())
            .ok_or(TokenError::MalformedPayload)?;

        let token = notification
            .token
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingCredential)?;

        let claims = decode_claims(&token)?;

        Ok(TokenContext {
            entity_id: EntityId(entity_id),
            subject_id: claims.sub.unwrap_or_default(),
            subject_label: claims.name.unwrap_or_default(),
            token,
        })
    }
}

/// Decode the claims segment of a JWT-shaped token without verifying
/// its signature.
fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::MalformedToken(
            "expected three dot-separated segments".into(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::MalformedToken(format!("claims segment is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::MalformedToken(format!("claims are not a JSON object: {e}")))
}
