//! Access Pattern Recorder
//!
//! Keeps a bounded per-subject history of accesses and three aggregates that
//! are updated incrementally on every record: per-subject key frequencies,
//! events per group, and events per hour of day.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{hour_of_day, Clock};

/// Opaque situational hints attached to an access or a prediction request.
pub type Context = HashMap<String, String>;

/// Context key naming the group (e.g. a course) an access belongs to.
pub const GROUP_ID: &str = "groupId";

/// Context key naming the key the subject is looking at right now.
pub const CURRENT_KEY: &str = "currentKey";

// == Access Event ==
/// One recorded access. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub subject_id: String,
    pub key: String,
    /// Unix milliseconds
    pub timestamp: u64,
    #[serde(default)]
    pub context: Context,
}

impl AccessEvent {
    /// Group id carried in the event context, if any.
    pub fn group_id(&self) -> Option<&str> {
        self.context.get(GROUP_ID).map(String::as_str)
    }
}

/// How often a subject touched a key within its retained window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFrequency {
    pub count: u64,
    /// Timestamp of the most recent access
    pub last_seen: u64,
}

/// Bounds for the recorder's buffers.
#[derive(Debug, Clone, Copy)]
pub struct RecorderLimits {
    /// Events kept per subject
    pub history_capacity: usize,
    /// Events kept per group
    pub group_capacity: usize,
    /// Events kept per hour bucket
    pub hour_capacity: usize,
}

impl Default for RecorderLimits {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            group_capacity: 1000,
            hour_capacity: 1000,
        }
    }
}

// == Pattern Snapshot ==
/// Serializable aggregate model. Raw per-subject histories are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    /// When the snapshot was taken (Unix milliseconds)
    pub saved_at: u64,
    /// subject id -> key -> frequency
    pub subjects: HashMap<String, HashMap<String, KeyFrequency>>,
    /// group id -> events, oldest first
    pub groups: HashMap<String, Vec<AccessEvent>>,
    /// hour of day -> events, oldest first
    pub hours: BTreeMap<u8, Vec<AccessEvent>>,
}

#[derive(Debug, Default)]
struct SubjectHistory {
    events: VecDeque<AccessEvent>,
    frequency: HashMap<String, KeyFrequency>,
}

#[derive(Debug, Default)]
struct PatternState {
    subjects: HashMap<String, SubjectHistory>,
    groups: HashMap<String, VecDeque<AccessEvent>>,
    hours: BTreeMap<u8, VecDeque<AccessEvent>>,
    /// Set on every mutation, cleared when a snapshot is persisted
    dirty: bool,
}

fn push_bounded(buffer: &mut VecDeque<AccessEvent>, event: AccessEvent, capacity: usize) {
    buffer.push_back(event);
    while buffer.len() > capacity {
        buffer.pop_front();
    }
}

// == Recorder ==
/// Records subject/key/time access events.
#[derive(Debug)]
pub struct AccessPatternRecorder {
    clock: Arc<dyn Clock>,
    limits: RecorderLimits,
    state: RwLock<PatternState>,
}

impl AccessPatternRecorder {
    pub fn new(clock: Arc<dyn Clock>, limits: RecorderLimits) -> Self {
        Self {
            clock,
            limits,
            state: RwLock::new(PatternState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PatternState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PatternState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // == Record ==
    /// Appends an access for `subject_id` and folds it into every aggregate.
    ///
    /// When the subject's history is full the oldest event is dropped and its
    /// contribution to the frequency map is withdrawn.
    pub fn record(&self, subject_id: &str, key: &str, context: Context) -> AccessEvent {
        let event = AccessEvent {
            subject_id: subject_id.to_string(),
            key: key.to_string(),
            timestamp: self.clock.now_ms(),
            context,
        };
        let hour = hour_of_day(event.timestamp);

        let mut guard = self.write();
        let state = &mut *guard;
        let limits = self.limits;

        let history = state.subjects.entry(subject_id.to_string()).or_default();
        let freq = history.frequency.entry(event.key.clone()).or_default();
        freq.count += 1;
        freq.last_seen = freq.last_seen.max(event.timestamp);
        history.events.push_back(event.clone());

        while history.events.len() > limits.history_capacity {
            if let Some(dropped) = history.events.pop_front() {
                if let Some(f) = history.frequency.get_mut(&dropped.key) {
                    f.count = f.count.saturating_sub(1);
                    if f.count == 0 {
                        history.frequency.remove(&dropped.key);
                    }
                }
            }
        }

        if let Some(group) = event.group_id() {
            let bucket = state.groups.entry(group.to_string()).or_default();
            push_bounded(bucket, event.clone(), limits.group_capacity);
        }

        let bucket = state.hours.entry(hour).or_default();
        push_bounded(bucket, event.clone(), limits.hour_capacity);

        state.dirty = true;
        debug!(subject = subject_id, key, hour, "Recorded access");
        event
    }

    // == Aggregate Views ==
    /// Key frequencies for a subject within its retained window.
    pub fn frequencies(&self, subject_id: &str) -> Vec<(String, KeyFrequency)> {
        self.read()
            .subjects
            .get(subject_id)
            .map(|h| h.frequency.iter().map(|(k, f)| (k.clone(), *f)).collect())
            .unwrap_or_default()
    }

    /// Events recorded under a group, oldest first.
    pub fn group_events(&self, group_id: &str) -> Vec<AccessEvent> {
        self.read()
            .groups
            .get(group_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent `limit` events of an hour bucket, newest first.
    pub fn recent_hour_events(&self, hour: u8, limit: usize) -> Vec<AccessEvent> {
        self.read()
            .hours
            .get(&hour)
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Retained raw history for a subject, oldest first.
    pub fn history(&self, subject_id: &str) -> Vec<AccessEvent> {
        self.read()
            .subjects
            .get(subject_id)
            .map(|h| h.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subject_count(&self) -> usize {
        self.read().subjects.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    /// Flags the model as needing another save (after a failed persist).
    pub fn mark_dirty(&self) {
        self.write().dirty = true;
    }

    // == Persistence ==
    /// Captures the aggregate model and clears the dirty flag.
    pub fn snapshot(&self) -> PatternSnapshot {
        let mut state = self.write();
        state.dirty = false;
        PatternSnapshot {
            saved_at: self.clock.now_ms(),
            subjects: state
                .subjects
                .iter()
                .map(|(id, h)| (id.clone(), h.frequency.clone()))
                .collect(),
            groups: state
                .groups
                .iter()
                .map(|(id, events)| (id.clone(), events.iter().cloned().collect()))
                .collect(),
            hours: state
                .hours
                .iter()
                .map(|(hour, events)| (*hour, events.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Replaces the aggregates with a persisted model.
    ///
    /// Restored frequencies act as a baseline: there is no raw history
    /// behind them, so ring-buffer overflow never withdraws them.
    pub fn restore(&self, snapshot: PatternSnapshot) {
        let limits = self.limits;
        let mut state = self.write();

        state.subjects = snapshot
            .subjects
            .into_iter()
            .map(|(id, frequency)| {
                (
                    id,
                    SubjectHistory {
                        events: VecDeque::new(),
                        frequency,
                    },
                )
            })
            .collect();
        state.groups = snapshot
            .groups
            .into_iter()
            .map(|(id, events)| {
                let mut bucket = VecDeque::new();
                for event in events {
                    push_bounded(&mut bucket, event, limits.group_capacity);
                }
                (id, bucket)
            })
            .collect();
        state.hours = snapshot
            .hours
            .into_iter()
            .filter(|(hour, _)| *hour < 24)
            .map(|(hour, events)| {
                let mut bucket = VecDeque::new();
                for event in events {
                    push_bounded(&mut bucket, event, limits.hour_capacity);
                }
                (hour, bucket)
            })
            .collect();
        state.dirty = false;
    }

    /// Drops every event and aggregate.
    pub fn clear(&self) {
        let mut state = self.write();
        *state = PatternState {
            dirty: true,
            ..PatternState::default()
        };
    }
}
