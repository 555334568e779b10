// src/ingest/enrich.rs
//! Record enricher: sentiment, time-of-day, day-of-week and location.

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::ingest::clean_content;
use crate::ingest::gazetteer::Gazetteer;
use crate::ingest::types::{EnrichedRecord, LocationSource, RawItem, TimeOfDay};
use crate::sentiment::{LexiconScorer, SentimentScorer, SentimentThresholds};

/// Four-way split of the UTC day. Hours before `morning_start` are night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPartition {
    pub morning_start: u32,
    pub afternoon_start: u32,
    pub evening_start: u32,
}

impl Default for DayPartition {
    fn default() -> Self {
        Self {
            morning_start: 6,
            afternoon_start: 12,
            evening_start: 18,
        }
    }
}

impl DayPartition {
    pub fn is_valid(&self) -> bool {
        0 < self.morning_start
            && self.morning_start < self.afternoon_start
            && self.afternoon_start < self.evening_start
            && self.evening_start < 24
    }

    pub fn bucket(&self, hour: u32) -> TimeOfDay {
        if hour < self.morning_start {
            TimeOfDay::Night
        } else if hour < self.afternoon_start {
            TimeOfDay::Morning
        } else if hour < self.evening_start {
            TimeOfDay::Afternoon
        } else {
            TimeOfDay::Evening
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationFallback {
    #[default]
    WeightedRandom,
    Unresolved,
}

pub struct Enricher {
    source: String,
    scorer: Box<dyn SentimentScorer>,
    thresholds: SentimentThresholds,
    partition: DayPartition,
    gazetteer: Gazetteer,
    fallback: LocationFallback,
    rng: StdRng,
}

impl Enricher {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            scorer: Box::new(LexiconScorer::new()),
            thresholds: SentimentThresholds::default(),
            partition: DayPartition::default(),
            gazetteer: Gazetteer::default(),
            fallback: LocationFallback::default(),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn SentimentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_thresholds(mut self, thresholds: SentimentThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_partition(mut self, partition: DayPartition) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_gazetteer(mut self, gazetteer: Gazetteer) -> Self {
        self.gazetteer = gazetteer;
        self
    }

    pub fn with_fallback(mut self, fallback: LocationFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// `created_at` is the timestamp the filter already validated.
    pub fn enrich(&mut self, item: &RawItem, created_at: DateTime<Utc>) -> EnrichedRecord {
        let content = clean_content(&item.body);
        let score = self.scorer.score(&content);
        let label = self.thresholds.label(score).to_string();

        let declared = item
            .declared_location
            .as_deref()
            .and_then(|d| self.gazetteer.resolve(d));
        let (city, location_source) = match declared {
            Some(c) => (Some(c), LocationSource::Declared),
            None => match self.fallback {
                LocationFallback::WeightedRandom => match self.gazetteer.sample(&mut self.rng) {
                    Some(c) => (Some(c), LocationSource::Sampled),
                    None => (None, LocationSource::Unresolved),
                },
                LocationFallback::Unresolved => (None, LocationSource::Unresolved),
            },
        };

        EnrichedRecord {
            id: item.id.clone(),
            source: self.source.clone(),
            created_at,
            content,
            author: item.author.clone(),
            url: item.url.clone(),
            sentiment_score: score,
            sentiment_label: label,
            time_of_day: self.partition.bucket(created_at.hour()),
            day_of_week: created_at.format("%A").to_string(),
            location: city.map(|c| c.name.clone()),
            geolocation: city.map(|c| c.point()),
            location_source,
            shares: item.shares,
            likes: item.likes,
        }
    }
}
