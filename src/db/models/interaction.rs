use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dirt::mutation::{CleanMutation, MutationStatus};

/// Analytics row for one spot cleaning attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotInteraction {
    pub id: String,
    pub aquarium_id: String,
    pub spot_id: String,
    pub status: MutationStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SpotInteraction {
    pub fn from_mutation(aquarium_id: &str, mutation: &CleanMutation) -> Self {
        Self {
            id: mutation.id.clone(),
            aquarium_id: aquarium_id.to_string(),
            spot_id: mutation.spot_id.clone(),
            status: mutation.status,
            error: mutation.error.clone(),
            created_at: mutation.started_at,
            resolved_at: mutation.resolved_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionCounts {
    pub total: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub pending: u64,
}
