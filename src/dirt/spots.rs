//! Maps a scalar dirt level and the time since the last cleaning onto a
//! bounded set of spots.
//!
//! The generator only ever appends. Spots already handed out keep their id,
//! position and look, so repeated reconciliation does not make the tank
//! "pop". Removal belongs to the interaction handler.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRACE_PERIOD_HOURS: f64 = 4.0;
pub const DEFAULT_HOURS_PER_SPOT: f64 = 1.0;
pub const DEFAULT_MAX_SPOTS: usize = 8;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpotCategory {
    Light,
    Medium,
    Heavy,
}

impl SpotCategory {
    pub const ALL: [SpotCategory; 3] = [SpotCategory::Light, SpotCategory::Medium, SpotCategory::Heavy];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotCategory::Light => "light",
            SpotCategory::Medium => "medium",
            SpotCategory::Heavy => "heavy",
        }
    }

    /// Pixel diameter range.
    pub fn size_range(&self) -> (f64, f64) {
        match self {
            SpotCategory::Light => (12.0, 20.0),
            SpotCategory::Medium => (20.0, 32.0),
            SpotCategory::Heavy => (32.0, 48.0),
        }
    }

    pub fn opacity_range(&self) -> (f64, f64) {
        match self {
            SpotCategory::Light => (0.25, 0.45),
            SpotCategory::Medium => (0.40, 0.65),
            SpotCategory::Heavy => (0.60, 0.85),
        }
    }

    /// Draw weights in `ALL` order, shifted toward heavier spots as the
    /// level climbs through its thirds.
    pub fn weights_for_level(level: f64) -> [f64; 3] {
        if level < 100.0 / 3.0 {
            [0.70, 0.25, 0.05]
        } else if level < 200.0 / 3.0 {
            [0.40, 0.40, 0.20]
        } else {
            [0.15, 0.40, 0.45]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: String,
    pub position: Position,
    pub category: SpotCategory,
    pub size: f64,
    pub opacity: f64,
    /// Local only; drives fade-in on the rendering side.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub header_band: f64,
    pub footer_band: f64,
    pub side_margin: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            header_band: 96.0,
            footer_band: 140.0,
            side_margin: 32.0,
        }
    }
}

/// Rectangle spots may be placed in: the viewport without its reserved bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeArea {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl SafeArea {
    pub fn from_viewport(viewport: &Viewport) -> Self {
        let min_x = viewport.side_margin.max(0.0);
        let min_y = viewport.header_band.max(0.0);
        // A viewport too small for its bands degenerates to a line, not an inverted box.
        let max_x = (viewport.width - viewport.side_margin).max(min_x);
        let max_y = (viewport.height - viewport.footer_band).max(min_y);
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn contains(&self, position: &Position) -> bool {
        position.x >= self.min_x
            && position.x <= self.max_x
            && position.y >= self.min_y
            && position.y <= self.max_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotConfig {
    pub grace_period_hours: f64,
    pub hours_per_spot: f64,
    pub max_spots: usize,
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: DEFAULT_GRACE_PERIOD_HOURS,
            hours_per_spot: DEFAULT_HOURS_PER_SPOT,
            max_spots: DEFAULT_MAX_SPOTS,
        }
    }
}

impl SpotConfig {
    pub fn expected_spot_count(&self, hours_since_cleaning: f64) -> usize {
        if !hours_since_cleaning.is_finite() {
            return if hours_since_cleaning > 0.0 { self.max_spots } else { 0 };
        }

        let dirty_hours = hours_since_cleaning - self.grace_period_hours;
        if dirty_hours <= 0.0 {
            return 0;
        }
        if self.hours_per_spot <= 0.0 {
            return self.max_spots;
        }

        let count = (dirty_hours / self.hours_per_spot).floor();
        if count >= self.max_spots as f64 {
            self.max_spots
        } else {
            count as usize
        }
    }

    pub fn expected_at(&self, last_cleaning_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> usize {
        self.expected_spot_count(hours_since_cleaning(last_cleaning_time, now))
    }
}

/// Hours elapsed since the last cleaning; 0 when unknown or in the future.
pub fn hours_since_cleaning(last_cleaning_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_cleaning_time {
        Some(cleaned_at) => ((now - cleaned_at).num_milliseconds() as f64 / MS_PER_HOUR).max(0.0),
        None => 0.0,
    }
}

/// Hands out spot ids for one engine instance.
#[derive(Debug, Clone)]
pub struct SpotSequence {
    prefix: String,
    next: u64,
}

impl SpotSequence {
    pub fn new(aquarium_id: &str) -> Self {
        Self {
            prefix: format!("spot-{aquarium_id}"),
            next: 1,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

pub struct SpotGenerator {
    config: SpotConfig,
    area: SafeArea,
    sequence: SpotSequence,
    rng: StdRng,
}

impl SpotGenerator {
    pub fn new(config: SpotConfig, area: SafeArea, sequence: SpotSequence) -> Self {
        Self::with_rng(config, area, sequence, StdRng::from_entropy())
    }

    pub fn with_rng(config: SpotConfig, area: SafeArea, sequence: SpotSequence, rng: StdRng) -> Self {
        Self {
            config,
            area,
            sequence,
            rng,
        }
    }

    pub fn config(&self) -> &SpotConfig {
        &self.config
    }

    pub fn area(&self) -> &SafeArea {
        &self.area
    }

    pub fn issued_ids(&self) -> u64 {
        self.sequence.issued()
    }

    /// Returns the spot set implied by `(level, last_cleaning_time)` at `now`,
    /// keeping every spot in `existing`.
    pub fn generate(
        &mut self,
        existing: &[Spot],
        level: f64,
        last_cleaning_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Spot> {
        let target = self.config.expected_at(last_cleaning_time, now);
        self.generate_with_budget(existing, level, target, now)
    }

    /// Tops `existing` up to `target` spots (capped at `max_spots`).
    pub fn generate_with_budget(
        &mut self,
        existing: &[Spot],
        level: f64,
        target: usize,
        now: DateTime<Utc>,
    ) -> Vec<Spot> {
        let target = target.min(self.config.max_spots);
        let mut spots = existing.to_vec();
        if spots.len() >= target {
            return spots;
        }

        let weights = SpotCategory::weights_for_level(level);
        while spots.len() < target {
            let spot = self.spawn(&weights, now);
            spots.push(spot);
        }
        spots
    }

    fn spawn(&mut self, weights: &[f64; 3], now: DateTime<Utc>) -> Spot {
        let category = self.draw_category(weights);
        let (min_size, max_size) = category.size_range();
        let (min_opacity, max_opacity) = category.opacity_range();

        Spot {
            id: self.sequence.next_id(),
            position: Position {
                x: sample(&mut self.rng, self.area.min_x, self.area.max_x),
                y: sample(&mut self.rng, self.area.min_y, self.area.max_y),
            },
            category,
            size: sample(&mut self.rng, min_size, max_size),
            opacity: sample(&mut self.rng, min_opacity, max_opacity),
            created_at: now,
        }
    }

    fn draw_category(&mut self, weights: &[f64; 3]) -> SpotCategory {
        let total: f64 = weights.iter().sum();
        let mut roll = self.rng.gen::<f64>() * total;
        for (category, weight) in SpotCategory::ALL.iter().zip(weights) {
            if roll < *weight {
                return *category;
            }
            roll -= weight;
        }
        SpotCategory::Heavy
    }
}

fn sample(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn generator(seed: u64) -> SpotGenerator {
        SpotGenerator::with_rng(
            SpotConfig::default(),
            SafeArea::from_viewport(&Viewport::default()),
            SpotSequence::new("tank-1"),
            StdRng::seed_from_u64(seed),
        )
    }

    fn hours_ago(now: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
        now - Duration::milliseconds((hours * MS_PER_HOUR) as i64)
    }

    #[test]
    fn nine_and_a_half_hours_yields_five_spots() {
        let config = SpotConfig::default();
        assert_eq!(config.expected_spot_count(9.5), 5);

        let now = Utc::now();
        let spots = generator(1).generate(&[], 50.0, Some(hours_ago(now, 9.5)), now);
        assert_eq!(spots.len(), 5);
    }

    #[test]
    fn grace_period_never_produces_spots() {
        let config = SpotConfig::default();
        for tenth in 0..40 {
            assert_eq!(config.expected_spot_count(tenth as f64 / 10.0), 0);
        }

        let now = Utc::now();
        let spots = generator(2).generate(&[], 100.0, Some(hours_ago(now, 3.9)), now);
        assert!(spots.is_empty());
    }

    #[test]
    fn unknown_cleaning_time_means_no_spots() {
        let now = Utc::now();
        assert_eq!(hours_since_cleaning(None, now), 0.0);
        assert!(generator(3).generate(&[], 90.0, None, now).is_empty());
    }

    #[test]
    fn future_cleaning_time_counts_as_zero_hours() {
        let now = Utc::now();
        assert_eq!(hours_since_cleaning(Some(now + Duration::hours(3)), now), 0.0);
    }

    #[test]
    fn expected_count_is_monotonic_and_capped() {
        let config = SpotConfig::default();
        let mut previous = 0;
        for step in 0..400 {
            let count = config.expected_spot_count(step as f64 * 0.1);
            assert!(count >= previous, "count dropped at {step}");
            assert!(count <= config.max_spots);
            previous = count;
        }
        assert_eq!(config.expected_spot_count(10_000.0), config.max_spots);
        assert_eq!(config.expected_spot_count(f64::INFINITY), config.max_spots);
    }

    #[test]
    fn count_is_independent_of_level() {
        let now = Utc::now();
        let cleaned = Some(hours_ago(now, 7.2));
        for level in [0.0, 12.5, 50.0, 99.0, 100.0, 180.0] {
            let spots = generator(4).generate(&[], level, cleaned, now);
            assert_eq!(spots.len(), 3, "level {level}");
        }
    }

    #[test]
    fn existing_spots_are_kept_and_not_regenerated() {
        let now = Utc::now();
        let cleaned = Some(hours_ago(now, 9.5));
        let mut gen = generator(5);

        let first = gen.generate(&[], 40.0, cleaned, now);
        let second = gen.generate(&first, 40.0, cleaned, now);
        assert_eq!(first, second);

        // An oversized set is never trimmed.
        let later = gen.generate(&first, 40.0, Some(hours_ago(now, 5.0)), now);
        assert_eq!(later.len(), first.len());
    }

    #[test]
    fn growth_appends_after_existing_spots() {
        let now = Utc::now();
        let mut gen = generator(6);
        let early = gen.generate(&[], 20.0, Some(hours_ago(now, 6.0)), now);
        assert_eq!(early.len(), 2);

        let later = gen.generate(&early, 20.0, Some(hours_ago(now, 8.0)), now);
        assert_eq!(later.len(), 4);
        assert_eq!(&later[..2], &early[..]);
    }

    #[test]
    fn ids_are_unique_across_bursts() {
        let now = Utc::now();
        let mut gen = generator(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            let spots = gen.generate_with_budget(&[], 50.0, 8, now);
            for spot in spots {
                assert!(seen.insert(spot.id));
            }
        }
        assert_eq!(gen.issued_ids(), 40);
    }

    #[test]
    fn spots_stay_inside_the_safe_area_and_category_ranges() {
        let now = Utc::now();
        let mut gen = generator(8);
        let area = *gen.area();
        for _ in 0..50 {
            for spot in gen.generate_with_budget(&[], 75.0, 8, now) {
                assert!(area.contains(&spot.position));
                let (min_size, max_size) = spot.category.size_range();
                assert!(spot.size >= min_size && spot.size <= max_size);
                let (min_opacity, max_opacity) = spot.category.opacity_range();
                assert!(spot.opacity >= min_opacity && spot.opacity <= max_opacity);
            }
        }
    }

    #[test]
    fn heavier_levels_draw_heavier_spots() {
        let now = Utc::now();
        let heavy_share = |level: f64| {
            let mut gen = generator(9);
            let mut heavy = 0;
            for _ in 0..250 {
                heavy += gen
                    .generate_with_budget(&[], level, 8, now)
                    .iter()
                    .filter(|spot| spot.category == SpotCategory::Heavy)
                    .count();
            }
            heavy
        };
        assert!(heavy_share(90.0) > heavy_share(10.0));
    }

    #[test]
    fn cramped_viewport_degenerates_safely() {
        let area = SafeArea::from_viewport(&Viewport {
            width: 40.0,
            height: 100.0,
            header_band: 80.0,
            footer_band: 80.0,
            side_margin: 32.0,
        });
        assert!(area.max_x >= area.min_x);
        assert!(area.max_y >= area.min_y);
    }
}
