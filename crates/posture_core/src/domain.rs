//! crates/posture_core/src/domain.rs
//!
//! Pure data structures for the posture tracker. These are independent of the
//! database and of the HTTP layer; the snapshot/summary types carry `serde`
//! derives because they are returned verbatim over the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stable internal identity for a tracked user.
///
/// Produced only by the identity resolver: either a registered user's durable
/// database id, or a deterministic hash of an unregistered identifier. No
/// other component derives identity on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserKey(i64);

impl UserKey {
    /// Wraps a registered user's durable id (e.g. from an authenticated
    /// request). Unregistered identifiers must go through the resolver.
    pub fn registered(id: i64) -> Self {
        Self(id)
    }

    pub(crate) fn new(key: i64) -> Self {
        Self(key)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The five monitoring event kinds accepted at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStart,
    SessionStop,
    BadPosture,
    TooClose,
    ActivitySet,
}

/// Error for an event kind string that is not one of the five known kinds.
#[derive(Debug, thiserror::Error)]
#[error("unknown event type: {0:?}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SESSION_START" => Ok(Self::SessionStart),
            "SESSION_STOP" => Ok(Self::SessionStop),
            "BAD_POSTURE" => Ok(Self::BadPosture),
            "TOO_CLOSE" => Ok(Self::TooClose),
            "ACTIVITY_SET" => Ok(Self::ActivitySet),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// The two counter-bearing incident kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentKind {
    BadPosture,
    TooClose,
}

/// One continuous monitoring interval for one user key.
///
/// A session with `ended_at = None` is open; the ledger maintains at most one
/// open session per user key at any time.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub user_key: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub activity: Option<String>,
    pub bad_posture_count: i32,
    pub too_close_count: i32,
    /// Duration in whole minutes, persisted when the session is closed.
    pub minutes: Option<i64>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Duration in whole minutes, preferring the stored value and deriving
    /// `(end-or-now - start) / 60` (floored at zero) otherwise.
    pub fn duration_minutes(&self, now: DateTime<Utc>) -> i64 {
        if let Some(minutes) = self.minutes {
            return minutes.max(0);
        }
        let end = self.ended_at.unwrap_or(now);
        ((end - self.started_at).num_seconds() / 60).max(0)
    }

    /// Timestamp of the most recent data carried by this session.
    pub fn latest_data_at(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.started_at)
    }
}

/// Wire-facing view of a session, returned from the event-ingestion endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: i64,
    pub user_key: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub activity: Option<String>,
    pub bad_posture_count: i32,
    pub too_close_count: i32,
    pub minutes: i64,
}

impl SessionSnapshot {
    pub fn from_record(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            session_id: record.id,
            user_key: record.user_key,
            started_at: record.started_at.timestamp(),
            ended_at: record.ended_at.map(|t| t.timestamp()),
            activity: record.activity.clone(),
            bad_posture_count: record.bad_posture_count,
            too_close_count: record.too_close_count,
            minutes: record.duration_minutes(now),
        }
    }
}

/// Lifetime accumulation over all of a user's sessions; input to the score
/// engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTotals {
    pub session_count: i64,
    pub total_minutes: i64,
    pub bad_posture_total: i64,
    pub too_close_total: i64,
}

/// A registered user as seen by the rest of the application.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub username: Option<String>,
}

impl UserProfile {
    /// Best display name available for this profile.
    pub fn display_name(&self) -> &str {
        match &self.username {
            Some(name) if !name.is_empty() => name,
            _ => &self.email,
        }
    }
}

/// Login credentials; only used by the auth endpoints.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: i64,
    pub email: String,
    pub username: Option<String>,
    pub password_hash: String,
}

/// One row of a user's friends registry.
#[derive(Debug, Clone)]
pub struct FriendRecord {
    pub id: i64,
    pub owner_email: String,
    pub friend_key: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
}

/// Fields required to register a friend.
#[derive(Debug, Clone)]
pub struct NewFriend {
    pub owner_email: String,
    pub friend_key: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
}

/// One ranked leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub score: i32,
}

/// Cached weekly coach recommendation for one user key.
#[derive(Debug, Clone)]
pub struct WeeklyRecommendation {
    pub user_key: i64,
    pub recommendation: String,
    pub model: String,
    /// Latest session data timestamp seen when the text was generated.
    pub source_latest_data_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// Fields persisted when a recommendation is (re)generated.
#[derive(Debug, Clone)]
pub struct NewRecommendation {
    pub user_key: i64,
    pub recommendation: String,
    pub model: String,
    pub source_latest_data_at: Option<DateTime<Utc>>,
}

/// Day or week lookback window for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsRange {
    Day,
    Week,
}

impl StatsRange {
    pub const DAY_SECONDS: i64 = 86_400;
    pub const WEEK_SECONDS: i64 = 604_800;

    pub fn window_seconds(self) -> i64 {
        match self {
            Self::Day => Self::DAY_SECONDS,
            Self::Week => Self::WEEK_SECONDS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

/// One hourly chart bucket (day range).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourBucket {
    pub hour: u32,
    pub bad_posture_count: i64,
    pub too_close_count: i64,
}

/// One daily chart bucket (week range), keyed by a `YYYY-MM-DD` date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: String,
    pub bad_posture_count: i64,
    pub too_close_count: i64,
}

/// Chart buckets for the requested range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatsBuckets {
    Hourly(Vec<HourBucket>),
    Daily(Vec<DayBucket>),
}

/// Time-windowed aggregation over one user's sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    /// Current all-time score for the user (0 when none persisted yet).
    pub user_score: i32,
    pub bad_posture_count: i64,
    pub too_close_count: i64,
    pub total_minutes: i64,
    /// Mean of per-session scores inside the window, 0 for an empty window.
    pub score_average: i32,
    /// Minutes per activity label, reported as hours with two decimals.
    pub activity_breakdown: BTreeMap<String, f64>,
    pub buckets: StatsBuckets,
}

/// Reply from the weekly coach, cached or freshly generated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachReply {
    pub ok: bool,
    pub user_id: String,
    pub has_data: bool,
    pub updated: bool,
    pub recommendation: String,
    pub generated_at: Option<i64>,
}
