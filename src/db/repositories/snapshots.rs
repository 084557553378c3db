use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{connection::Database, helpers::parse_datetime, models::CachedSnapshot};
use crate::dirt::snapshot::DecaySnapshot;

impl Database {
    /// Stores the latest authoritative snapshot, replacing any older entry.
    pub async fn upsert_snapshot(
        &self,
        aquarium_id: &str,
        snapshot: &DecaySnapshot,
        cached_at: DateTime<Utc>,
    ) -> Result<()> {
        let aquarium_id = aquarium_id.to_string();
        let payload = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
        let level = snapshot.level;
        let last_cleaning_time = snapshot.last_cleaning_time.map(|dt| dt.to_rfc3339());

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO dirt_snapshots (aquarium_id, level, last_cleaning_time, payload, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(aquarium_id) DO UPDATE SET
                     level = excluded.level,
                     last_cleaning_time = excluded.last_cleaning_time,
                     payload = excluded.payload,
                     cached_at = excluded.cached_at",
                params![
                    aquarium_id,
                    level,
                    last_cleaning_time,
                    payload,
                    cached_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert cached snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn load_snapshot(&self, aquarium_id: &str) -> Result<Option<CachedSnapshot>> {
        let aquarium_id = aquarium_id.to_string();
        self.execute(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT payload, cached_at FROM dirt_snapshots WHERE aquarium_id = ?1",
                    params![aquarium_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((payload, cached_at)) = row else {
                return Ok(None);
            };

            let snapshot: DecaySnapshot = serde_json::from_str(&payload)
                .with_context(|| format!("corrupt cached snapshot for aquarium {aquarium_id}"))?;

            Ok(Some(CachedSnapshot {
                aquarium_id,
                snapshot,
                cached_at: parse_datetime(&cached_at, "cached_at")?,
            }))
        })
        .await
    }

    pub async fn delete_snapshot(&self, aquarium_id: &str) -> Result<()> {
        let aquarium_id = aquarium_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM dirt_snapshots WHERE aquarium_id = ?1",
                params![aquarium_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn upsert_replaces_and_delete_clears() {
        let db = Database::in_memory().expect("in-memory cache");
        let now = Utc::now();
        assert!(db.load_snapshot("7").await.expect("load").is_none());

        let mut snapshot = DecaySnapshot::from_level(44.0, Some(now - Duration::hours(8)));
        snapshot.cleaning_streak = 3;
        db.upsert_snapshot("7", &snapshot, now - Duration::minutes(5))
            .await
            .expect("first upsert");
        db.upsert_snapshot("7", &snapshot.with_level(48.0), now)
            .await
            .expect("second upsert");

        let cached = db.load_snapshot("7").await.expect("load").expect("entry");
        assert_eq!(cached.snapshot.level, 48.0);
        assert_eq!(cached.snapshot.cleaning_streak, 3);
        assert_eq!(cached.cached_at.timestamp(), now.timestamp());

        db.delete_snapshot("7").await.expect("delete");
        assert!(db.load_snapshot("7").await.expect("load").is_none());
    }
}
