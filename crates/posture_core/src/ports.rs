//! crates/posture_core/src/ports.rs
//!
//! Service contracts (traits) for the application's core logic. These traits
//! form the boundary of the hexagonal architecture, keeping the core
//! independent of the concrete database and language-model integrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    FriendRecord, IncidentKind, NewFriend, NewRecommendation, SessionRecord, SessionTotals,
    UserCredentials, UserKey, UserProfile, WeeklyRecommendation,
};

/// A generic error type for all port operations, abstracting away the
/// specific errors of external services.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// Convenience alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Storage for session rows and the derived per-user score.
///
/// These operations are deliberately fine-grained CRUD; the ledger owns the
/// state machine and serializes conflicting writers per user key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The user's open session (`ended_at IS NULL`), if any.
    async fn open_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>>;

    /// The user's most recently created session, open or closed.
    async fn latest_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>>;

    /// Inserts a fresh open session with zeroed counters.
    async fn insert_session(
        &self,
        user_key: UserKey,
        started_at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord>;

    /// Finalizes a session: sets its end timestamp and stored minutes.
    async fn close_session(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        minutes: i64,
    ) -> PortResult<SessionRecord>;

    /// Increments the matching incident counter by exactly one.
    async fn record_incident(
        &self,
        session_id: i64,
        kind: IncidentKind,
    ) -> PortResult<SessionRecord>;

    /// Overwrites the activity label (last write wins).
    async fn set_activity(&self, session_id: i64, activity: &str) -> PortResult<SessionRecord>;

    /// Sessions whose start timestamp falls in `[from, to]`, ascending.
    async fn sessions_started_between(
        &self,
        user_key: UserKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<SessionRecord>>;

    /// The most recently started sessions, newest last, capped at `limit`.
    async fn recent_sessions(
        &self,
        user_key: UserKey,
        limit: i64,
    ) -> PortResult<Vec<SessionRecord>>;

    /// Accumulated totals over the user's full session history.
    async fn lifetime_totals(&self, user_key: UserKey) -> PortResult<SessionTotals>;

    /// Persists the derived score for this user key.
    async fn save_score(&self, user_key: UserKey, score: u8) -> PortResult<()>;

    /// The persisted score, if one has been computed yet.
    async fn score(&self, user_key: UserKey) -> PortResult<Option<i32>>;
}

/// Read-only lookup into the registered-user table.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Case-insensitive exact email match.
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<UserProfile>>;

    async fn find_user_by_id(&self, id: i64) -> PortResult<Option<UserProfile>>;
}

/// Account creation and browser-session management for the auth endpoints.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> PortResult<UserProfile>;

    async fn credentials_by_email(&self, email: &str) -> PortResult<Option<UserCredentials>>;

    async fn create_auth_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user id for a live (unexpired) session token.
    async fn validate_auth_session(&self, token: &str) -> PortResult<i64>;

    async fn delete_auth_session(&self, token: &str) -> PortResult<()>;
}

/// The friends registry, keyed by the owner's email identity.
#[async_trait]
pub trait FriendDirectory: Send + Sync {
    async fn friends_of(&self, owner_email: &str) -> PortResult<Vec<FriendRecord>>;

    async fn add_friend(&self, friend: NewFriend) -> PortResult<FriendRecord>;
}

/// Cache of the weekly coach recommendation, one row per user key.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn latest_recommendation(
        &self,
        user_key: UserKey,
    ) -> PortResult<Option<WeeklyRecommendation>>;

    async fn upsert_recommendation(
        &self,
        recommendation: NewRecommendation,
    ) -> PortResult<WeeklyRecommendation>;
}

/// The language-model collaborator behind the coach endpoints.
///
/// Implementations must bound their calls with an explicit timeout; callers
/// treat any error as "use the deterministic fallback".
#[async_trait]
pub trait CoachModel: Send + Sync {
    /// One concise weekly recommendation for the given activity summary.
    async fn weekly_recommendation(&self, prompt: &str) -> PortResult<String>;

    /// Free-form answer for the coach chat endpoint.
    async fn answer(&self, question: &str) -> PortResult<String>;
}
