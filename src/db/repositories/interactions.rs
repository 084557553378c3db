use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_mutation_status, parse_optional_datetime},
    models::{InteractionCounts, SpotInteraction},
};

fn row_to_interaction(row: &Row) -> Result<SpotInteraction> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;

    Ok(SpotInteraction {
        id: row.get("id")?,
        aquarium_id: row.get("aquarium_id")?,
        spot_id: row.get("spot_id")?,
        status: parse_mutation_status(&status)?,
        error: row.get("error")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        resolved_at: parse_optional_datetime(resolved_at, "resolved_at")?,
    })
}

impl Database {
    /// Inserts or updates an interaction row (pending first, resolved later).
    pub async fn record_interaction(&self, interaction: &SpotInteraction) -> Result<()> {
        let record = interaction.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO spot_interactions (id, aquarium_id, spot_id, status, error, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     error = excluded.error,
                     resolved_at = excluded.resolved_at",
                params![
                    record.id,
                    record.aquarium_id,
                    record.spot_id,
                    record.status.as_str(),
                    record.error,
                    record.created_at.to_rfc3339(),
                    record.resolved_at.map(|dt| dt.to_rfc3339()),
                ],
            )
            .with_context(|| "failed to record spot interaction")?;
            Ok(())
        })
        .await
    }

    /// Most recent interactions for an aquarium, newest first.
    pub async fn recent_interactions(
        &self,
        aquarium_id: &str,
        limit: u32,
    ) -> Result<Vec<SpotInteraction>> {
        let aquarium_id = aquarium_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, aquarium_id, spot_id, status, error, created_at, resolved_at
                 FROM spot_interactions
                 WHERE aquarium_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;

            let mut rows = stmt.query(params![aquarium_id, limit])?;
            let mut interactions = Vec::new();
            while let Some(row) = rows.next()? {
                interactions.push(row_to_interaction(row)?);
            }
            Ok(interactions)
        })
        .await
    }

    pub async fn count_interactions(&self, aquarium_id: &str) -> Result<InteractionCounts> {
        let aquarium_id = aquarium_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM spot_interactions
                 WHERE aquarium_id = ?1
                 GROUP BY status",
            )?;

            let mut counts = InteractionCounts::default();
            let mut rows = stmt.query(params![aquarium_id])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let count = count.max(0) as u64;
                match parse_mutation_status(&status)? {
                    crate::dirt::mutation::MutationStatus::Pending => counts.pending += count,
                    crate::dirt::mutation::MutationStatus::Confirmed => counts.confirmed += count,
                    crate::dirt::mutation::MutationStatus::Rejected => counts.rejected += count,
                }
                counts.total += count;
            }
            Ok(counts)
        })
        .await
    }
}
