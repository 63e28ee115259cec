//! Timestamp sampling for frame extraction.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_COUNT: usize = 1;
pub const MAX_COUNT: usize = 8;
pub const DEFAULT_COUNT: usize = 5;

/// Upper bound on the random-mode edge margin, in seconds.
const RANDOM_MARGIN_CAP: f64 = 3.0;
/// Random-mode edge margin as a share of the duration.
const RANDOM_MARGIN_RATIO: f64 = 0.05;
/// Random timestamps are drawn on a 10 ms grid.
const SLOTS_PER_SECOND: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
    #[error("Could not determine video duration")]
    UnknownDuration,
    #[error("Invalid video duration: {0}")]
    InvalidDuration(f64),
    #[error("Unknown thumbnail mode '{0}' (expected random, timeline or custom)")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    #[default]
    Random,
    Timeline,
    #[serde(alias = "custom")]
    Explicit,
}

impl SampleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Timeline => "timeline",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for SampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleMode {
    type Err = SamplingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "timeline" => Ok(Self::Timeline),
            "explicit" | "custom" => Ok(Self::Explicit),
            other => Err(SamplingError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePlan {
    pub mode: SampleMode,
    pub timestamps: Vec<f64>,
}

impl SamplePlan {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Clamps a requested count into `[MIN_COUNT, MAX_COUNT]`; `None` is the default.
pub fn clamp_count(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_COUNT,
        Some(n) if n < MIN_COUNT as i64 => MIN_COUNT,
        Some(n) if n > MAX_COUNT as i64 => MAX_COUNT,
        Some(n) => n as usize,
    }
}

pub fn plan(
    duration: Option<f64>,
    count: usize,
    mode: SampleMode,
    explicit: &[f64],
) -> Result<SamplePlan, SamplingError> {
    plan_with_rng(duration, count, mode, explicit, &mut rand::rng())
}

/// [`plan`] with an injected random source.
pub fn plan_with_rng<R: Rng>(
    duration: Option<f64>,
    count: usize,
    mode: SampleMode,
    explicit: &[f64],
    rng: &mut R,
) -> Result<SamplePlan, SamplingError> {
    let duration = checked_duration(duration)?;
    let count = count.clamp(MIN_COUNT, MAX_COUNT);

    let timestamps = match mode {
        SampleMode::Timeline => timeline(duration, count),
        SampleMode::Random => random(duration, count, rng),
        SampleMode::Explicit => explicit
            .iter()
            .copied()
            .filter(|t| t.is_finite() && (0.0..=duration).contains(t))
            .take(count)
            .collect(),
    };

    Ok(SamplePlan { mode, timestamps })
}

/// Samples over the shorter of two sources so every timestamp exists in both.
pub fn plan_pair(
    duration_a: Option<f64>,
    duration_b: Option<f64>,
    count: usize,
    mode: SampleMode,
    explicit: &[f64],
) -> Result<SamplePlan, SamplingError> {
    plan_pair_with_rng(duration_a, duration_b, count, mode, explicit, &mut rand::rng())
}

pub fn plan_pair_with_rng<R: Rng>(
    duration_a: Option<f64>,
    duration_b: Option<f64>,
    count: usize,
    mode: SampleMode,
    explicit: &[f64],
    rng: &mut R,
) -> Result<SamplePlan, SamplingError> {
    let a = checked_duration(duration_a)?;
    let b = checked_duration(duration_b)?;
    plan_with_rng(Some(a.min(b)), count, mode, explicit, rng)
}

fn checked_duration(duration: Option<f64>) -> Result<f64, SamplingError> {
    match duration {
        None => Err(SamplingError::UnknownDuration),
        Some(d) if !d.is_finite() || d <= 0.0 => Err(SamplingError::InvalidDuration(d)),
        Some(d) => Ok(d),
    }
}

fn timeline(duration: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| (i + 1) as f64 * duration / (count + 1) as f64)
        .collect()
}

fn random<R: Rng>(duration: f64, count: usize, rng: &mut R) -> Vec<f64> {
    let margin = RANDOM_MARGIN_CAP.min(RANDOM_MARGIN_RATIO * duration);
    let low = (margin * SLOTS_PER_SECOND).ceil() as u64;
    let high = ((duration - margin) * SLOTS_PER_SECOND).floor() as u64;

    if high < low {
        return vec![duration / 2.0];
    }

    let capacity = high - low + 1;
    let wanted = (count as u64).min(capacity) as usize;
    let mut slots = BTreeSet::new();
    while slots.len() < wanted {
        slots.insert(rng.random_range(low..=high));
    }

    slots
        .into_iter()
        .map(|slot| slot as f64 / SLOTS_PER_SECOND)
        .collect()
}

/// `MM:SS.mmm`, or `HH:MM:SS.mmm` from one hour on.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
    } else {
        format!("{minutes:02}:{secs:02}.{millis:03}")
    }
}
