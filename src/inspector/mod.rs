mod types;

pub use types::{CategoryCount, InspectorReport, MutationSummary};

use chrono::{DateTime, Utc};

use crate::dirt::{spots::SpotCategory, CleanMutation, EngineSnapshot};

/// How many resolved mutations the report carries.
const RECENT_MUTATIONS: usize = 5;

fn summarize(mutation: &CleanMutation, now: DateTime<Utc>) -> MutationSummary {
    MutationSummary {
        spot_id: mutation.spot_id.clone(),
        status: mutation.status,
        age_secs: (now - mutation.started_at).num_seconds().max(0),
        error: mutation.error.clone(),
    }
}

impl InspectorReport {
    pub fn capture(snapshot: &EngineSnapshot, now: DateTime<Utc>) -> Self {
        let histogram = SpotCategory::ALL
            .iter()
            .map(|category| CategoryCount {
                category: *category,
                count: snapshot
                    .spots
                    .iter()
                    .filter(|spot| spot.category == *category)
                    .count(),
            })
            .collect();

        let recent = snapshot
            .recent_mutations
            .iter()
            .rev()
            .take(RECENT_MUTATIONS)
            .map(|m| summarize(m, now))
            .collect();

        let decay = &snapshot.snapshot;
        Self {
            aquarium_id: snapshot.aquarium_id.clone(),
            strategy: snapshot.strategy.as_str().to_string(),
            sync: snapshot.sync.as_str().to_string(),
            stale: snapshot.stale,
            cleaning: snapshot.cleaning,
            level: decay.level,
            status_label: decay.status.label.clone(),
            status_color: decay.status.color.clone(),
            cleaning_streak: decay.cleaning_streak,
            total_cleanings: decay.total_cleanings,
            last_cleaning_time: decay.last_cleaning_time,
            spot_count: snapshot.spots.len(),
            expected_spot_count: snapshot.expected_spot_count,
            histogram,
            pending: snapshot
                .pending_mutations
                .iter()
                .map(|m| summarize(m, now))
                .collect(),
            recent,
            interaction_count: snapshot.interaction_count,
            staleness_secs: snapshot
                .last_synced_at
                .map(|at| (now - at).num_seconds().max(0)),
            last_error: snapshot.last_error.clone(),
            captured_at: now,
        }
    }

    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "aquarium {} [{}] sync={}{}",
                self.aquarium_id,
                self.strategy,
                self.sync,
                if self.cleaning { " (cleaning)" } else { "" }
            ),
            format!(
                "level {:.1} {} {} | streak {} | total cleanings {}",
                self.level,
                self.status_label,
                self.status_color,
                self.cleaning_streak,
                self.total_cleanings
            ),
        ];

        let histogram = self
            .histogram
            .iter()
            .map(|entry| format!("{}={}", entry.category.as_str(), entry.count))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!(
            "spots {}/{} expected | {}",
            self.spot_count, self.expected_spot_count, histogram
        ));

        let last_cleaned = self
            .last_cleaning_time
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let synced = match self.staleness_secs {
            Some(secs) => format!("{secs}s ago"),
            None => "never".to_string(),
        };
        lines.push(format!(
            "last cleaned {last_cleaned} | last sync {synced} | interactions {}",
            self.interaction_count
        ));

        for pending in &self.pending {
            lines.push(format!(
                "  pending clean {} ({}s)",
                pending.spot_id, pending.age_secs
            ));
        }
        for recent in &self.recent {
            let suffix = recent
                .error
                .as_deref()
                .map(|err| format!(": {err}"))
                .unwrap_or_default();
            lines.push(format!(
                "  {} {}{}",
                recent.status.as_str().to_lowercase(),
                recent.spot_id,
                suffix
            ));
        }

        if self.stale {
            if let Some(error) = &self.last_error {
                lines.push(format!("stale: {error}"));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirt::{
        spots::{SafeArea, SpotConfig, SpotGenerator, SpotSequence, Viewport},
        state::{EngineState, SyncStrategy},
        DecaySnapshot,
    };
    use chrono::Duration;
    use rand::{rngs::StdRng, SeedableRng};

    fn synced_state(now: DateTime<Utc>) -> EngineState {
        let generator = SpotGenerator::with_rng(
            SpotConfig::default(),
            SafeArea::from_viewport(&Viewport::default()),
            SpotSequence::new("inspect"),
            StdRng::seed_from_u64(5),
        );
        let mut state = EngineState::new("inspect".into(), SyncStrategy::Authoritative, generator);
        let epoch = state.issue_epoch();
        state.apply_authoritative(
            DecaySnapshot::from_level(72.0, Some(now - Duration::minutes(630))),
            epoch,
            now - Duration::seconds(45),
        );
        state
    }

    #[test]
    fn histogram_accounts_for_every_spot() {
        let now = Utc::now();
        let state = synced_state(now);
        let report = InspectorReport::capture(&state.to_snapshot(now), now);

        assert_eq!(report.spot_count, 6);
        assert_eq!(report.expected_spot_count, 6);
        assert_eq!(
            report.histogram.iter().map(|entry| entry.count).sum::<usize>(),
            report.spot_count
        );
        assert_eq!(report.sync, "SYNCED");
        assert_eq!(report.staleness_secs, Some(45));
        assert!(!report.stale);
    }

    #[test]
    fn render_reports_pending_and_stale_errors() {
        let now = Utc::now();
        let mut state = synced_state(now);
        let target = state.spots[0].id.clone();
        state.remove_spot(&target);
        state
            .mutations
            .push(CleanMutation::begin(&target, 9, 72.0, 67.0, now - Duration::seconds(3)));
        state.mark_stale("connection refused".into());

        let lines = InspectorReport::capture(&state.to_snapshot(now), now).render();
        assert!(lines[0].contains("sync=STALE (cleaning)"));
        assert!(lines[2].starts_with("spots 5/6"));
        assert!(lines
            .iter()
            .any(|line| line.contains(&format!("pending clean {target} (3s)"))));
        assert_eq!(lines.last().map(String::as_str), Some("stale: connection refused"));
    }
}
