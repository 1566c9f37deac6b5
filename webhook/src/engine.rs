//! Synchronization engine: one reconciliation pass per call.
//!
//! Both flows share one shape: load the edited entity, walk its
//! relationship graph to the set of person/task pairs that should be
//! able to see each other, and apply the missing grants in a single
//! best-effort batch. The remote store is the sole source of truth
//! and is consulted fresh on every pass.

use std::collections::HashSet;
use std::time::Instant;

use directory::{DirectoryClient, DirectoryError, EntityId, EntityKind, GrantResult};
use serde::Serialize;

use crate::errors::WebhookError;
use crate::metrics_defs::{
    GRANTS_FAILED, GRANTS_SKIPPED, GRANTS_SUCCESSFUL, SYNC_PASS_DURATION, SYNC_PASSES,
};

/// Summary of one reconciliation pass.
///
/// `related_found` counts tasks for the person flow and persons for
/// the task flow.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PassSummary {
    pub groups_found: usize,
    pub related_found: usize,
    #[serde(flatten)]
    pub grants: GrantResult,
}

#[derive(Clone)]
pub struct SyncEngine {
    directory: DirectoryClient,
}

impl SyncEngine {
    pub fn new(directory: DirectoryClient) -> Self {
        Self { directory }
    }

    /// Reconcile after a person entity was edited: grant the person
    /// access to every task belonging to any of their parent groups.
    pub async fn propagate_from_person(
        &self,
        person_id: &EntityId,
        token: &str,
    ) -> Result<PassSummary, WebhookError> {
        let started = Instant::now();
        metrics::counter!(SYNC_PASSES.name).increment(1);

        let person = self
            .directory
            .fetch_entity(person_id, token)
            .await
            .map_err(|e| remote(person_id, e))?;

        if person.group_ids.is_empty() {
            // No parent groups: a valid, terminal outcome.
            return Ok(self.finish(person_id, PassSummary::default(), started));
        }

        // Union of tasks across all groups, de-duplicated by task id;
        // a task may belong to more than one of the person's groups.
        let mut seen = HashSet::new();
        let mut task_ids = Vec::new();
        for group_id in &person.group_ids {
            let tasks = self
                .directory
                .list_related(EntityKind::Task, "group", group_id, token)
                .await
                .map_err(|e| remote(person_id, e))?;
            for task in tasks {
                if seen.insert(task.id.clone()) {
                    task_ids.push(task.id);
                }
            }
        }

        let mut summary = PassSummary {
            groups_found: person.group_ids.len(),
            related_found: task_ids.len(),
            grants: GrantResult::default(),
        };

        if !task_ids.is_empty() {
            summary.grants = self
                .directory
                .grant_access(std::slice::from_ref(&person.id), &task_ids, token)
                .await;
        }

        Ok(self.finish(person_id, summary, started))
    }

    /// Reconcile after a task entity was edited: grant every person in
    /// the task's group access to the task.
    pub async fn propagate_from_task(
        &self,
        task_id: &EntityId,
        token: &str,
    ) -> Result<PassSummary, WebhookError> {
        let started = Instant::now();
        metrics::counter!(SYNC_PASSES.name).increment(1);

        let task = self
            .directory
            .fetch_entity(task_id, token)
            .await
            .map_err(|e| remote(task_id, e))?;

        let Some(group_id) = task.group_id else {
            // Task not assigned to a group: terminal success.
            return Ok(self.finish(task_id, PassSummary::default(), started));
        };

        let persons = self
            .directory
            .list_related(EntityKind::Person, "groups", &group_id, token)
            .await
            .map_err(|e| remote(task_id, e))?;

        let subject_ids: Vec<EntityId> = persons.into_iter().map(|p| p.id).collect();

        let mut summary = PassSummary {
            groups_found: 1,
            related_found: subject_ids.len(),
            grants: GrantResult::default(),
        };

        if !subject_ids.is_empty() {
            summary.grants = self
                .directory
                .grant_access(&subject_ids, std::slice::from_ref(&task.id), token)
                .await;
        }

        Ok(self.finish(task_id, summary, started))
    }

    fn finish(&self, entity_id: &EntityId, summary: PassSummary, started: Instant) -> PassSummary {
        metrics::counter!(GRANTS_SUCCESSFUL.name).increment(summary.grants.successful as u64);
        metrics::counter!(GRANTS_SKIPPED.name).increment(summary.grants.skipped as u64);
        metrics::counter!(GRANTS_FAILED.name).increment(summary.grants.failed as u64);
        metrics::histogram!(SYNC_PASS_DURATION.name).record(started.elapsed().as_secs_f64());

        tracing::info!(
            entity_id = %entity_id,
            groups_found = summary.groups_found,
            related_found = summary.related_found,
            granted = summary.grants.successful,
            skipped = summary.grants.skipped,
            failed = summary.grants.failed,
            "reconciliation pass finished"
        );

        summary
    }
}

fn remote(entity_id: &EntityId, source: DirectoryError) -> WebhookError {
    WebhookError::Remote {
        entity_id: entity_id.to_string(),
        source,
    }
}
