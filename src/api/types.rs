//! Wire shapes of the dirt service and their conversion into engine types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dirt::snapshot::{clamp_level, CleanlinessStatus, DecaySnapshot};

use super::error::DirtError;

/// `{ success, data }` wrapper used by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn into_data(self) -> Result<T, DirtError> {
        if !self.success {
            let reason = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "success=false".to_string());
            return Err(DirtError::Unsuccessful(reason));
        }
        self.data
            .ok_or_else(|| DirtError::Malformed("response is missing `data`".into()))
    }
}

/// Some server builds send the full bucket, others only its key.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatusPayload {
    Full {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    Key(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirtData {
    pub current_dirt_level: f64,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_cleaning_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cleaning_streak: u32,
    #[serde(default)]
    pub total_cleanings: u32,
    #[serde(default)]
    pub is_dirty: Option<bool>,
    #[serde(default)]
    pub needs_cleaning: Option<bool>,
    #[serde(default)]
    pub cleanliness_status: Option<StatusPayload>,
    #[serde(default)]
    pub hours_since_cleaning: Option<f64>,
}

impl TryFrom<DirtData> for DecaySnapshot {
    type Error = DirtError;

    fn try_from(data: DirtData) -> Result<Self, Self::Error> {
        if !data.current_dirt_level.is_finite() {
            return Err(DirtError::Malformed(format!(
                "current_dirt_level is not a number: {}",
                data.current_dirt_level
            )));
        }

        let mut snapshot = DecaySnapshot::from_level(data.current_dirt_level, data.last_cleaning_time);
        let level = snapshot.level;

        snapshot.cleaning_streak = data.cleaning_streak;
        snapshot.total_cleanings = data.total_cleanings;
        if let Some(is_dirty) = data.is_dirty {
            snapshot.is_dirty = is_dirty;
        }
        if let Some(needs_cleaning) = data.needs_cleaning {
            snapshot.needs_cleaning = needs_cleaning;
        }
        snapshot.hours_since_cleaning = data.hours_since_cleaning.filter(|h| h.is_finite());

        snapshot.status = match data.cleanliness_status {
            Some(StatusPayload::Key(key)) => CleanlinessStatus::from_key(&key, level),
            Some(StatusPayload::Full { level: key, label, color }) => {
                let derived = match key.as_deref() {
                    Some(key) => CleanlinessStatus::from_key(key, level),
                    None => CleanlinessStatus::from_level(level),
                };
                CleanlinessStatus {
                    level: derived.level,
                    label: label.unwrap_or(derived.label),
                    color: color.unwrap_or(derived.color),
                }
            }
            None => CleanlinessStatus::from_level(level),
        };

        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanSpotRequest<'a> {
    pub spot_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CleanSpotResponse {
    pub new_dirt_level: f64,
    #[serde(default)]
    pub is_complete_cleaning: bool,
    /// Absent on partial cleans from older servers.
    #[serde(default)]
    pub cleaning_streak: Option<u32>,
}

impl CleanSpotResponse {
    pub fn validated(mut self) -> Result<Self, DirtError> {
        if !self.new_dirt_level.is_finite() {
            return Err(DirtError::Malformed(format!(
                "new_dirt_level is not a number: {}",
                self.new_dirt_level
            )));
        }
        self.new_dirt_level = clamp_level(self.new_dirt_level);
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Accepts RFC 3339 as well as naive ISO timestamps (read as UTC).
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("invalid timestamp '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_from(value: serde_json::Value) -> Result<DecaySnapshot, DirtError> {
        let envelope: Envelope<DirtData> = serde_json::from_value(value)?;
        DecaySnapshot::try_from(envelope.into_data()?)
    }

    #[test]
    fn full_payload_maps_onto_snapshot() {
        let snapshot = snapshot_from(json!({
            "success": true,
            "data": {
                "current_dirt_level": 62.5,
                "last_cleaning_time": "2026-10-18T08:00:00Z",
                "cleaning_streak": 3,
                "total_cleanings": 17,
                "is_dirty": true,
                "needs_cleaning": true,
                "cleanliness_status": { "level": "dirty", "label": "Dirty", "color": "#f97316" },
                "hours_since_cleaning": 9.5
            }
        }))
        .expect("valid payload");

        assert_eq!(snapshot.level, 62.5);
        assert_eq!(snapshot.cleaning_streak, 3);
        assert_eq!(snapshot.total_cleanings, 17);
        assert_eq!(snapshot.status.label, "Dirty");
        assert_eq!(snapshot.hours_since_cleaning, Some(9.5));
        assert_eq!(
            snapshot.last_cleaning_time.map(|t| t.to_rfc3339()),
            Some("2026-10-18T08:00:00+00:00".to_string())
        );
    }

    #[test]
    fn sparse_payload_derives_missing_fields() {
        let snapshot = snapshot_from(json!({
            "success": true,
            "data": {
                "current_dirt_level": 130,
                "last_cleaning_time": "2026-10-18 08:00:00",
                "cleanliness_status": "very_dirty"
            }
        }))
        .expect("valid payload");

        assert_eq!(snapshot.level, 100.0);
        assert!(snapshot.is_dirty);
        assert!(snapshot.needs_cleaning);
        assert_eq!(snapshot.status.label, "Very Dirty");
        assert!(snapshot.last_cleaning_time.is_some());
    }

    #[test]
    fn null_cleaning_time_is_unknown() {
        let snapshot = snapshot_from(json!({
            "success": true,
            "data": { "current_dirt_level": 0, "last_cleaning_time": null }
        }))
        .expect("valid payload");
        assert_eq!(snapshot.last_cleaning_time, None);
    }

    #[test]
    fn unsuccessful_and_malformed_envelopes_are_errors() {
        let err = snapshot_from(json!({ "success": false, "message": "no such aquarium" }))
            .unwrap_err();
        assert_eq!(err, DirtError::Unsuccessful("no such aquarium".into()));

        let err = snapshot_from(json!({ "success": true })).unwrap_err();
        assert_eq!(err.kind(), "malformed");

        let err = snapshot_from(json!({
            "success": true,
            "data": { "current_dirt_level": "lots" }
        }))
        .unwrap_err();
        assert_eq!(err.kind(), "malformed");

        let err = snapshot_from(json!({
            "success": true,
            "data": { "current_dirt_level": 10, "last_cleaning_time": "yesterday" }
        }))
        .unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn clean_response_is_clamped() {
        let response: Envelope<CleanSpotResponse> = serde_json::from_value(json!({
            "success": true,
            "data": { "new_dirt_level": -4, "is_complete_cleaning": true, "cleaning_streak": 1 }
        }))
        .expect("valid payload");
        let response = response.into_data().and_then(CleanSpotResponse::validated).expect("data");
        assert_eq!(response.new_dirt_level, 0.0);
        assert!(response.is_complete_cleaning);
        assert_eq!(response.cleaning_streak, Some(1));
    }

    #[test]
    fn clean_response_without_streak_leaves_it_unset() {
        let response: Envelope<CleanSpotResponse> = serde_json::from_value(json!({
            "success": true,
            "data": { "new_dirt_level": 61.5 }
        }))
        .expect("valid payload");
        let response = response.into_data().expect("data");
        assert!(!response.is_complete_cleaning);
        assert_eq!(response.cleaning_streak, None);
    }
}
