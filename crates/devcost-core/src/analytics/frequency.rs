//! Activity frequency over fixed windows
//!
//! Windows are laid from the earliest start timestamp and cover everything
//! up to the latest one. All bucketing is in UTC. Activities without a
//! usable timestamp are ignored.

use chrono::{DateTime, Duration, Timelike, Utc};
use devcost_types::{Activity, ActivityType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFrequency {
    pub window_ms: i64,
    /// Number of windows spanning [earliest, latest]
    pub windows: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    /// Average activities per window, per type
    pub per_window: BTreeMap<ActivityType, f64>,
    /// Activities per hour of day (0-23, UTC)
    pub hourly_distribution: [usize; 24],
    /// Busiest hour (earliest hour wins ties)
    pub peak_hour: Option<u8>,
}

/// Bucket activities into `window`-sized windows
///
/// A non-positive window collapses everything into a single window.
pub fn activity_frequency(activities: &[Activity], window: Duration) -> ActivityFrequency {
    let timed: Vec<(ActivityType, DateTime<Utc>)> = activities
        .iter()
        .filter_map(|a| a.timestamp().map(|ts| (a.activity_type, ts)))
        .collect();

    let earliest = timed.iter().map(|(_, ts)| *ts).min();
    let latest = timed.iter().map(|(_, ts)| *ts).max();
    let window_ms = window.num_milliseconds();

    let windows = match (earliest, latest) {
        (Some(first), Some(last)) if window_ms > 0 => {
            let span_ms = (last - first).num_milliseconds();
            (span_ms / window_ms) as u64 + 1
        }
        (Some(_), Some(_)) => 1,
        _ => 0,
    };

    let mut counts: BTreeMap<ActivityType, usize> = BTreeMap::new();
    let mut hourly_distribution = [0usize; 24];
    for (activity_type, ts) in &timed {
        *counts.entry(*activity_type).or_insert(0) += 1;
        hourly_distribution[ts.hour() as usize] += 1;
    }

    let per_window = counts
        .into_iter()
        .map(|(activity_type, count)| (activity_type, count as f64 / windows.max(1) as f64))
        .collect();

    let peak_hour = hourly_distribution
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .fold(None, |best: Option<(usize, usize)>, (hour, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((hour, *count)),
        })
        .map(|(hour, _)| hour as u8);

    ActivityFrequency {
        window_ms,
        windows,
        earliest,
        latest,
        per_window,
        hourly_distribution,
        peak_hour,
    }
}
