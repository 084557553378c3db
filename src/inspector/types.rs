use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dirt::{spots::SpotCategory, MutationStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: SpotCategory,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSummary {
    pub spot_id: String,
    pub status: MutationStatus,
    pub age_secs: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorReport {
    pub aquarium_id: String,
    pub strategy: String,
    pub sync: String,
    pub stale: bool,
    pub cleaning: bool,
    pub level: f64,
    pub status_label: String,
    pub status_color: String,
    pub cleaning_streak: u32,
    pub total_cleanings: u32,
    pub last_cleaning_time: Option<DateTime<Utc>>,
    pub spot_count: usize,
    pub expected_spot_count: usize,
    pub histogram: Vec<CategoryCount>,
    pub pending: Vec<MutationSummary>,
    pub recent: Vec<MutationSummary>,
    pub interaction_count: u64,
    /// Seconds since the last successful fetch; `None` if there never was one.
    pub staleness_secs: Option<i64>,
    pub last_error: Option<String>,
    pub captured_at: DateTime<Utc>,
}
