//! Prediction Module
//!
//! Learns per-subject access patterns and turns them into ranked prefetch
//! candidates.

mod engine;
mod recorder;

pub use engine::{
    Prediction, PredictionEngine, PredictionLimits, PredictionReason, FREQUENCY_CONFIDENCE_CAP,
    GROUP_CONFIDENCE, TIME_OF_DAY_CONFIDENCE,
};
pub use recorder::{
    AccessEvent, AccessPatternRecorder, Context, KeyFrequency, PatternSnapshot, RecorderLimits,
    CURRENT_KEY, GROUP_ID,
};
