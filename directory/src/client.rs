//! Thin remote-call layer over the backing entity store.
//!
//! Every call forwards the triggering editor's bearer token so the
//! store attributes relationship changes to the real person who made
//! the edit, not to a privileged service identity.

use http::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::types::{EntityId, EntityKind, EntityRef, GrantRequest, GrantResult};

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("entity store base URL cannot carry path segments")]
    InvalidBaseUrl,

    #[error("entity store rejected the relayed token")]
    Unauthorized,

    #[error("entity store returned {0} for {1}")]
    RemoteError(StatusCode, String),

    #[error("entity store request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct DirectoryClient {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EntityList {
    entities: Vec<EntityRef>,
}

impl DirectoryClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Build an endpoint URL under the configured base, preserving
    /// any path the base carries and percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetch a single entity by id.
    pub async fn fetch_entity(
        &self,
        id: &EntityId,
        token: &str,
    ) -> Result<EntityRef, DirectoryError> {
        let url = self.endpoint(&["v1", "entities", id.as_str()])?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<EntityRef>().await?),
            StatusCode::UNAUTHORIZED => Err(DirectoryError::Unauthorized),
            status => Err(DirectoryError::RemoteError(status, url.to_string())),
        }
    }

    /// List entities of `kind` whose `filter_field` references
    /// `filter_value`. No match is an empty list, not an error.
    pub async fn list_related(
        &self,
        kind: EntityKind,
        filter_field: &str,
        filter_value: &EntityId,
        token: &str,
    ) -> Result<Vec<EntityRef>, DirectoryError> {
        let url = self.endpoint(&["v1", "entities"])?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .query(&[
                ("kind", kind.as_str()),
                ("field", filter_field),
                ("value", filter_value.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<EntityList>().await?.entities),
            StatusCode::UNAUTHORIZED => Err(DirectoryError::Unauthorized),
            status => Err(DirectoryError::RemoteError(status, url.to_string())),
        }
    }

    /// Grant access for the cross product of subjects and targets.
    ///
    /// Best-effort and partially completable: a relationship that
    /// already exists counts as skipped, an individual failure counts
    /// as failed, and neither stops the remaining grants. Only the
    /// aggregate is returned.
    pub async fn grant_access(
        &self,
        subject_ids: &[EntityId],
        target_ids: &[EntityId],
        token: &str,
    ) -> GrantResult {
        let mut result = GrantResult::default();

        for subject_id in subject_ids {
            for target_id in target_ids {
                let request = GrantRequest {
                    subject_id: subject_id.clone(),
                    target_id: target_id.clone(),
                };
                match self.grant_one(&request, token).await {
                    Ok(GrantOutcome::Created) => result.successful += 1,
                    Ok(GrantOutcome::AlreadyExists) => result.skipped += 1,
                    Err(err) => {
                        tracing::warn!(
                            subject_id = %request.subject_id,
                            target_id = %request.target_id,
                            error = %err,
                            "grant attempt failed"
                        );
                        result.failed += 1;
                    }
                }
            }
        }

        result
    }

    async fn grant_one(
        &self,
        request: &GrantRequest,
        token: &str,
    ) -> Result<GrantOutcome, DirectoryError> {
        let url = self.endpoint(&["v1", "permissions"])?;

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(GrantOutcome::Created),
            StatusCode::CONFLICT => Ok(GrantOutcome::AlreadyExists),
            StatusCode::UNAUTHORIZED => Err(DirectoryError::Unauthorized),
            status => Err(DirectoryError::RemoteError(status, url.to_string())),
        }
    }
}

enum GrantOutcome {
    Created,
    AlreadyExists,
}
