use chrono::{DateTime, TimeDelta, Utc};
use dashmon_common::time::{parse_duration, DEFAULT_RANGE_SECS};
use dashmon_common::types::{QueryRequest, QueryResult, SeriesPoint, SYNTHETIC_METRICS};
use rand::Rng;

/// Spacing of synthetic samples, in seconds.
const SAMPLE_SPACING_SECS: i64 = 60;

/// Upper bound on synthetic points per series.
const MAX_POINTS: i64 = 100;

/// Produces plausible-looking random series for sources that are missing or
/// failing. Values lie in `[0, 100]` with two decimals.
#[derive(Debug, Clone, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, request: &QueryRequest, now: DateTime<Utc>) -> QueryResult {
        let data = synthetic_series(&request.from, now, &mut rand::thread_rng());
        QueryResult::Mock { data }
    }

    pub fn metrics(&self) -> Vec<String> {
        SYNTHETIC_METRICS.iter().map(|m| m.to_string()).collect()
    }
}

/// Evenly spaced points covering `from..=now`, oldest first.
///
/// The point count is `min(duration / 60, 100)`; a range shorter than one
/// minute yields a single point at `now`. A range reaching past the
/// representable dates is treated as one hour.
pub fn synthetic_series<R: Rng>(
    from: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<SeriesPoint> {
    let duration_secs = representable_range(parse_duration(from), now);
    let points = (duration_secs / SAMPLE_SPACING_SECS).min(MAX_POINTS);

    if points <= 0 {
        return vec![SeriesPoint {
            timestamp: now,
            value: sample_value(rng),
        }];
    }

    let spacing_ms = duration_secs * 1000 / points;
    (0..=points)
        .rev()
        .map(|i| SeriesPoint {
            timestamp: now - TimeDelta::milliseconds(i * spacing_ms),
            value: sample_value(rng),
        })
        .collect()
}

fn representable_range(duration_secs: i64, now: DateTime<Utc>) -> i64 {
    let fits = duration_secs
        .checked_mul(1000)
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|range| now.checked_sub_signed(range))
        .is_some();
    if fits {
        duration_secs
    } else {
        DEFAULT_RANGE_SECS
    }
}

fn sample_value<R: Rng>(rng: &mut R) -> f64 {
    (rng.gen_range(0.0..100.0_f64) * 100.0).round() / 100.0
}
