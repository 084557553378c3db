use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Keep the last few resolved mutations around for the inspector.
pub const MAX_RESOLVED_MUTATIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "Pending",
            MutationStatus::Confirmed => "Confirmed",
            MutationStatus::Rejected => "Rejected",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, MutationStatus::Pending)
    }
}

/// One optimistic spot cleaning, from local removal to server verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanMutation {
    pub id: String,
    pub spot_id: String,
    pub status: MutationStatus,
    /// Snapshot write epoch taken when the request was issued.
    pub epoch: u64,
    pub level_before: f64,
    pub optimistic_level: f64,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl CleanMutation {
    pub fn begin(
        spot_id: &str,
        epoch: u64,
        level_before: f64,
        optimistic_level: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("clean_{}", Uuid::new_v4()),
            spot_id: spot_id.to_string(),
            status: MutationStatus::Pending,
            epoch,
            level_before,
            optimistic_level,
            started_at,
            resolved_at: None,
            error: None,
        }
    }

    pub fn confirm(&mut self, at: DateTime<Utc>) {
        self.status = MutationStatus::Confirmed;
        self.resolved_at = Some(at);
    }

    pub fn reject(&mut self, at: DateTime<Utc>, error: String) {
        self.status = MutationStatus::Rejected;
        self.resolved_at = Some(at);
        self.error = Some(error);
    }
}

/// Pending mutations plus a bounded tail of resolved ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationLog {
    pending: Vec<CleanMutation>,
    resolved: Vec<CleanMutation>,
}

impl MutationLog {
    pub fn push(&mut self, mutation: CleanMutation) {
        self.pending.push(mutation);
    }

    pub fn is_pending(&self, spot_id: &str) -> bool {
        self.pending.iter().any(|m| m.spot_id == spot_id)
    }

    pub fn pending(&self) -> &[CleanMutation] {
        &self.pending
    }

    pub fn resolved(&self) -> &[CleanMutation] {
        &self.resolved
    }

    /// Moves the mutation out of the pending list, applying `resolve` to it.
    pub fn settle<F>(&mut self, mutation_id: &str, resolve: F) -> Option<CleanMutation>
    where
        F: FnOnce(&mut CleanMutation),
    {
        let index = self.pending.iter().position(|m| m.id == mutation_id)?;
        let mut mutation = self.pending.remove(index);
        resolve(&mut mutation);

        self.resolved.push(mutation.clone());
        if self.resolved.len() > MAX_RESOLVED_MUTATIONS {
            self.resolved.remove(0);
        }
        Some(mutation)
    }

    /// Drops all pending entries, e.g. on teardown.
    pub fn abandon_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}
