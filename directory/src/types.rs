use serde::{Deserialize, Serialize};

/// Opaque identifier of a record in the backing entity store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId(value)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Group,
    Task,
}

impl EntityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Group => "group",
            EntityKind::Task => "task",
        }
    }
}

/// Read-only view of a remote entity. Owned by the backing store and
/// never cached beyond a single reconciliation pass.
///
/// The relationship fields are kind-specific: persons carry a list of
/// parent group references, tasks carry at most one group reference,
/// groups carry neither.
#[derive(Clone, Debug, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub kind: EntityKind,
    /// Parent group references (persons).
    #[serde(default, rename = "groups")]
    pub group_ids: Vec<EntityId>,
    /// Owning group reference (tasks).
    #[serde(default, rename = "group")]
    pub group_id: Option<EntityId>,
}

/// "Subject should be able to access target."
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GrantRequest {
    pub subject_id: EntityId,
    pub target_id: EntityId,
}

/// Aggregated outcome of a batch of grant attempts.
///
/// `successful + skipped + failed` always equals the number of
/// requests submitted; a grant that already exists counts as skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GrantResult {
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl GrantResult {
    pub fn total(&self) -> usize {
        self.successful + self.skipped + self.failed
    }
}
