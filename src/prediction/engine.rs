//! Prediction Engine
//!
//! Ranks keys a subject is likely to need next by merging three heuristics
//! over the recorder's aggregates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::recorder::{AccessPatternRecorder, Context, CURRENT_KEY, GROUP_ID};
use crate::clock::{hour_of_day, Clock};

/// Confidence ceiling for frequency-based predictions.
pub const FREQUENCY_CONFIDENCE_CAP: f64 = 0.9;
/// Accesses that count as full confidence before the cap (count / divisor).
pub const FREQUENCY_DIVISOR: f64 = 10.0;
/// Fixed confidence for keys seen under the same group.
pub const GROUP_CONFIDENCE: f64 = 0.6;
/// Fixed confidence for keys seen in the current hour of day.
pub const TIME_OF_DAY_CONFIDENCE: f64 = 0.4;

// == Prediction Reason ==
/// Which heuristic produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionReason {
    FrequentAccess,
    GroupRelated,
    TimeOfDay,
}

// == Prediction ==
/// A ranked guess that `key` will be requested soon. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub key: String,
    /// In [0, 1]
    pub confidence: f64,
    pub reason: PredictionReason,
    pub context: Context,
    /// Most recent access backing the prediction (Unix milliseconds)
    pub last_seen: u64,
}

/// Tuning knobs for the engine.
#[derive(Debug, Clone, Copy)]
pub struct PredictionLimits {
    /// Size of the final ranked list
    pub top_k: usize,
    /// Size of each strategy's list before merging
    pub per_strategy: usize,
    /// Minimum accesses before a key is considered frequent
    pub min_frequency: u64,
}

impl Default for PredictionLimits {
    fn default() -> Self {
        Self {
            top_k: 10,
            per_strategy: 20,
            min_frequency: 2,
        }
    }
}

/// Confidence ordering, ties broken by recency then key.
fn rank(a: &Prediction, b: &Prediction) -> std::cmp::Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.last_seen.cmp(&a.last_seen))
        .then_with(|| a.key.cmp(&b.key))
}

// == Engine ==
#[derive(Debug)]
pub struct PredictionEngine {
    recorder: Arc<AccessPatternRecorder>,
    clock: Arc<dyn Clock>,
    limits: PredictionLimits,
}

impl PredictionEngine {
    pub fn new(
        recorder: Arc<AccessPatternRecorder>,
        clock: Arc<dyn Clock>,
        limits: PredictionLimits,
    ) -> Self {
        Self {
            recorder,
            clock,
            limits,
        }
    }

    // == Predict ==
    /// Returns at most `top_k` predictions, highest confidence first.
    ///
    /// When several strategies name the same key the highest confidence and
    /// its reason win; confidences are never summed.
    pub fn predict(&self, subject_id: &str, context: &Context) -> Vec<Prediction> {
        let mut merged: HashMap<String, Prediction> = HashMap::new();

        let candidates = self
            .frequency_based(subject_id, context)
            .into_iter()
            .chain(self.group_based(context))
            .chain(self.time_based(context));

        for candidate in candidates {
            match merged.get_mut(&candidate.key) {
                Some(existing) => {
                    let last_seen = existing.last_seen.max(candidate.last_seen);
                    if candidate.confidence > existing.confidence {
                        *existing = candidate;
                    }
                    existing.last_seen = last_seen;
                }
                None => {
                    merged.insert(candidate.key.clone(), candidate);
                }
            }
        }

        let mut ranked: Vec<Prediction> = merged.into_values().collect();
        ranked.sort_by(rank);
        ranked.truncate(self.limits.top_k);
        ranked
    }

    /// `min(0.9, count / 10)` for every key the subject hit at least twice.
    fn frequency_based(&self, subject_id: &str, context: &Context) -> Vec<Prediction> {
        let mut list: Vec<Prediction> = self
            .recorder
            .frequencies(subject_id)
            .into_iter()
            .filter(|(_, freq)| freq.count >= self.limits.min_frequency)
            .map(|(key, freq)| Prediction {
                key,
                confidence: (freq.count as f64 / FREQUENCY_DIVISOR).min(FREQUENCY_CONFIDENCE_CAP),
                reason: PredictionReason::FrequentAccess,
                context: context.clone(),
                last_seen: freq.last_seen,
            })
            .collect();
        list.sort_by(rank);
        list.truncate(self.limits.per_strategy);
        list
    }

    /// Every other key recorded under the context's group.
    fn group_based(&self, context: &Context) -> Vec<Prediction> {
        let Some(group_id) = context.get(GROUP_ID) else {
            return Vec::new();
        };
        let current = context.get(CURRENT_KEY);

        let mut latest: HashMap<String, u64> = HashMap::new();
        for event in self.recorder.group_events(group_id) {
            if Some(&event.key) == current {
                continue;
            }
            let seen = latest.entry(event.key).or_insert(0);
            *seen = (*seen).max(event.timestamp);
        }

        let mut list: Vec<Prediction> = latest
            .into_iter()
            .map(|(key, last_seen)| Prediction {
                key,
                confidence: GROUP_CONFIDENCE,
                reason: PredictionReason::GroupRelated,
                context: context.clone(),
                last_seen,
            })
            .collect();
        list.sort_by(rank);
        list.truncate(self.limits.per_strategy);
        list
    }

    /// Keys from the most recent events in the current hour-of-day bucket.
    fn time_based(&self, context: &Context) -> Vec<Prediction> {
        let hour = hour_of_day(self.clock.now_ms());
        let mut hinted = context.clone();
        hinted.insert("hour".to_string(), hour.to_string());

        let mut list: Vec<Prediction> = Vec::new();
        for event in self
            .recorder
            .recent_hour_events(hour, self.limits.per_strategy)
        {
            if list.iter().any(|p| p.key == event.key) {
                continue;
            }
            list.push(Prediction {
                key: event.key,
                confidence: TIME_OF_DAY_CONFIDENCE,
                reason: PredictionReason::TimeOfDay,
                context: hinted.clone(),
                last_seen: event.timestamp,
            });
        }
        list
    }
}
