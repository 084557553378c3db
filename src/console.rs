use crate::{
    db::Database,
    dirt::{DirtEngine, ReconcileOutcome},
    inspector::InspectorReport,
};

const HISTORY_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Spots,
    Clean(String),
    Reconcile,
    Init(Option<serde_json::Value>),
    History,
    Forget,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "status" | "s" => Ok(Command::Status),
            "spots" | "ls" => Ok(Command::Spots),
            "clean" | "c" => {
                if rest.is_empty() {
                    Err("usage: clean <spot-id>".to_string())
                } else {
                    Ok(Command::Clean(rest.to_string()))
                }
            }
            "reconcile" | "sync" => Ok(Command::Reconcile),
            "init" => {
                if rest.is_empty() {
                    return Ok(Command::Init(None));
                }
                serde_json::from_str(rest)
                    .map(|config| Command::Init(Some(config)))
                    .map_err(|e| format!("init config must be JSON: {e}"))
            }
            "history" => Ok(Command::History),
            "forget" => Ok(Command::Forget),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }
}

/// Line-oriented front end over one engine.
pub struct Console {
    engine: DirtEngine,
    cache: Option<Database>,
}

impl Console {
    pub fn new(engine: DirtEngine, cache: Option<Database>) -> Self {
        Self { engine, cache }
    }

    pub fn engine(&self) -> &DirtEngine {
        &self.engine
    }

    pub async fn handle(&self, command: Command) -> Result<Vec<String>, String> {
        match command {
            Command::Status => {
                let snapshot = self.engine.get_snapshot().await;
                Ok(InspectorReport::capture(&snapshot, snapshot.taken_at).render())
            }
            Command::Spots => {
                let spots = self.engine.spots().await;
                if spots.is_empty() {
                    return Ok(vec!["(no spots)".to_string()]);
                }
                Ok(spots
                    .iter()
                    .map(|spot| {
                        format!(
                            "{} {:<6} at ({:.0}, {:.0}) size {:.0} opacity {:.2}",
                            spot.id,
                            spot.category.as_str(),
                            spot.position.x,
                            spot.position.y,
                            spot.size,
                            spot.opacity
                        )
                    })
                    .collect())
            }
            Command::Clean(spot_id) => {
                let outcome = self
                    .engine
                    .clean(&spot_id)
                    .await
                    .map_err(|e| e.to_string())?;
                let mut line = format!(
                    "cleaned {} -> level {:.1}, {} spots left",
                    outcome.spot_id, outcome.new_level, outcome.remaining_spots
                );
                if outcome.is_complete_cleaning {
                    line.push_str(&format!(" (tank clean, streak {})", outcome.cleaning_streak));
                }
                Ok(vec![line])
            }
            Command::Reconcile => {
                let line = match self.engine.reconcile_once().await {
                    ReconcileOutcome::Synced { reset, spots } => {
                        format!("synced: {spots} spots{}", if reset { " (reset)" } else { "" })
                    }
                    ReconcileOutcome::Superseded => "superseded by a newer write".to_string(),
                    ReconcileOutcome::Skipped => "a reconciliation is already running".to_string(),
                    ReconcileOutcome::Degraded { error: Some(err), spots } => {
                        format!("stale ({err}); estimated {spots} spots")
                    }
                    ReconcileOutcome::Degraded { error: None, spots } => {
                        format!("estimated locally: {spots} spots")
                    }
                    ReconcileOutcome::Discarded => "engine is shut down".to_string(),
                };
                Ok(vec![line])
            }
            Command::Init(config) => {
                let data = self
                    .engine
                    .initialize(config)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(vec![format!("initialized: {data}")])
            }
            Command::History => {
                let cache = self.cache.as_ref().ok_or("no cache configured")?;
                let aquarium_id = self.engine.aquarium_id();
                let counts = cache
                    .count_interactions(aquarium_id)
                    .await
                    .map_err(|e| e.to_string())?;
                let recent = cache
                    .recent_interactions(aquarium_id, HISTORY_LIMIT)
                    .await
                    .map_err(|e| e.to_string())?;

                let mut lines = vec![format!(
                    "{} cleanings: {} confirmed, {} rejected, {} pending",
                    counts.total, counts.confirmed, counts.rejected, counts.pending
                )];
                lines.extend(recent.iter().map(|interaction| {
                    format!(
                        "  {} {} {}",
                        interaction.created_at.format("%Y-%m-%d %H:%M:%S"),
                        interaction.status.as_str().to_lowercase(),
                        interaction.spot_id
                    )
                }));
                Ok(lines)
            }
            Command::Forget => {
                let cache = self.cache.as_ref().ok_or("no cache configured")?;
                cache
                    .delete_snapshot(self.engine.aquarium_id())
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(vec!["cached snapshot removed".to_string()])
            }
            Command::Help => Ok(vec![
                "status              engine summary".to_string(),
                "spots               list live spots".to_string(),
                "clean <spot-id>     clean one spot".to_string(),
                "reconcile           fetch now".to_string(),
                "init [json]         initialize the aquarium on the server".to_string(),
                "history             recent cleanings from the cache".to_string(),
                "forget              drop the cached snapshot".to_string(),
                "quit".to_string(),
            ]),
            Command::Quit => Ok(Vec::new()),
        }
    }
}
