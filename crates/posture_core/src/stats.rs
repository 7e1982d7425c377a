//! crates/posture_core/src/stats.rs
//!
//! Time-windowed read-only statistics over a user's session rows: totals,
//! per-activity breakdown, and the chart buckets the dashboard plots.
//! Storage faults degrade to an all-zero summary; an empty window is never an
//! error.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::warn;

use crate::domain::{
    DayBucket, HourBucket, SessionRecord, StatsBuckets, StatsRange, StatsSummary, UserKey,
};
use crate::ports::SessionStore;
use crate::score::compute_score;

#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn SessionStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Summarizes the sessions whose start timestamp falls inside
    /// `[now - window, now]`.
    pub async fn summarize(
        &self,
        user_key: UserKey,
        range: StatsRange,
        now: DateTime<Utc>,
    ) -> StatsSummary {
        let from = now - Duration::seconds(range.window_seconds());
        let sessions = match self.store.sessions_started_between(user_key, from, now).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(user_key = user_key.as_i64(), %err, "stats query degraded to empty window");
                Vec::new()
            }
        };
        let user_score = match self.store.score(user_key).await {
            Ok(score) => score.unwrap_or(0),
            Err(err) => {
                warn!(user_key = user_key.as_i64(), %err, "score lookup degraded to zero");
                0
            }
        };
        aggregate(&sessions, range, now, user_score)
    }
}

/// Pure aggregation over an already-filtered window of sessions.
fn aggregate(
    sessions: &[SessionRecord],
    range: StatsRange,
    now: DateTime<Utc>,
    user_score: i32,
) -> StatsSummary {
    let mut bad_posture_count = 0i64;
    let mut too_close_count = 0i64;
    let mut total_minutes = 0i64;
    let mut score_sum = 0i64;
    let mut minutes_per_activity: BTreeMap<String, i64> = BTreeMap::new();
    let mut buckets = empty_buckets(range, now);

    for session in sessions {
        let minutes = session.duration_minutes(now);
        let bad = i64::from(session.bad_posture_count);
        let too_close = i64::from(session.too_close_count);

        bad_posture_count += bad;
        too_close_count += too_close;
        total_minutes += minutes;
        score_sum += i64::from(compute_score(minutes, bad, too_close));

        if let Some(activity) = session.activity.as_deref().filter(|a| !a.is_empty()) {
            *minutes_per_activity.entry(activity.to_string()).or_default() += minutes;
        }

        attribute(&mut buckets, session.started_at, bad, too_close);
    }

    let score_average = if sessions.is_empty() {
        0
    } else {
        (score_sum as f64 / sessions.len() as f64).round() as i32
    };

    let activity_breakdown = minutes_per_activity
        .into_iter()
        .map(|(activity, minutes)| (activity, round_hours(minutes)))
        .collect();

    StatsSummary {
        user_score,
        bad_posture_count,
        too_close_count,
        total_minutes,
        score_average,
        activity_breakdown,
        buckets,
    }
}

fn empty_buckets(range: StatsRange, now: DateTime<Utc>) -> StatsBuckets {
    match range {
        StatsRange::Day => StatsBuckets::Hourly(
            (0..24)
                .map(|hour| HourBucket {
                    hour,
                    bad_posture_count: 0,
                    too_close_count: 0,
                })
                .collect(),
        ),
        StatsRange::Week => StatsBuckets::Daily(
            (0..7)
                .rev()
                .map(|days_back| DayBucket {
                    date: (now - Duration::days(days_back))
                        .date_naive()
                        .format("%Y-%m-%d")
                        .to_string(),
                    bad_posture_count: 0,
                    too_close_count: 0,
                })
                .collect(),
        ),
    }
}

fn attribute(buckets: &mut StatsBuckets, started_at: DateTime<Utc>, bad: i64, too_close: i64) {
    match buckets {
        StatsBuckets::Hourly(hours) => {
            let hour = started_at.hour() as usize;
            if let Some(bucket) = hours.get_mut(hour) {
                bucket.bad_posture_count += bad;
                bucket.too_close_count += too_close;
            }
        }
        StatsBuckets::Daily(days) => {
            let date = started_at.date_naive().format("%Y-%m-%d").to_string();
            if let Some(bucket) = days.iter_mut().find(|b| b.date == date) {
                bucket.bad_posture_count += bad;
                bucket.too_close_count += too_close;
            }
        }
    }
}

/// Minutes expressed as hours, rounded to two decimal places.
fn round_hours(minutes: i64) -> f64 {
    (minutes as f64 / 60.0 * 100.0).round() / 100.0
}
