//! services/api/src/adapters/db.rs
//!
//! The database adapter: concrete implementations of the storage ports from
//! the `posture_core` crate on top of PostgreSQL via `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use posture_core::domain::{
    FriendRecord, IncidentKind, NewFriend, NewRecommendation, SessionRecord, SessionTotals,
    UserCredentials, UserKey, UserProfile, WeeklyRecommendation,
};
use posture_core::ports::{
    AuthStore, FriendDirectory, PortError, PortResult, RecommendationStore, SessionStore,
    UserDirectory,
};
use sqlx::{FromRow, PgPool};

const SESSION_COLUMNS: &str =
    "id, user_key, started_at, ended_at, activity, bad_posture_count, too_close_count, minutes";

/// A database adapter implementing the storage ports.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(err: sqlx::Error) -> PortError {
    PortError::Unexpected(err.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    user_key: i64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    activity: Option<String>,
    bad_posture_count: i32,
    too_close_count: i32,
    minutes: Option<i64>,
}

impl SessionRow {
    fn to_domain(self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            user_key: self.user_key,
            started_at: self.started_at,
            ended_at: self.ended_at,
            activity: self.activity,
            bad_posture_count: self.bad_posture_count,
            too_close_count: self.too_close_count,
            minutes: self.minutes,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    username: Option<String>,
}

impl UserRow {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email,
            username: self.username,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRow {
    id: i64,
    email: String,
    username: Option<String>,
    password_hash: String,
}

impl CredentialsRow {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            email: self.email,
            username: self.username,
            password_hash: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct FriendRow {
    id: i64,
    owner_email: String,
    friend_key: i64,
    username: Option<String>,
    email: Option<String>,
    display_name: String,
}

impl FriendRow {
    fn to_domain(self) -> FriendRecord {
        FriendRecord {
            id: self.id,
            owner_email: self.owner_email,
            friend_key: self.friend_key,
            username: self.username,
            email: self.email,
            display_name: self.display_name,
        }
    }
}

#[derive(FromRow)]
struct RecommendationRow {
    user_key: i64,
    recommendation: String,
    model: String,
    source_latest_data_at: Option<DateTime<Utc>>,
    generated_at: DateTime<Utc>,
}

impl RecommendationRow {
    fn to_domain(self) -> WeeklyRecommendation {
        WeeklyRecommendation {
            user_key: self.user_key,
            recommendation: self.recommendation,
            model: self.model,
            source_latest_data_at: self.source_latest_data_at,
            generated_at: self.generated_at,
        }
    }
}

#[derive(FromRow)]
struct TotalsRow {
    session_count: i64,
    total_minutes: i64,
    bad_posture_total: i64,
    too_close_total: i64,
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for PgStore {
    async fn open_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_key = $1 AND ended_at IS NULL \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(user_key.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn latest_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_key = $1 \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(user_key.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn insert_session(
        &self,
        user_key: UserKey,
        started_at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "INSERT INTO sessions (user_key, started_at, activity) \
             VALUES ($1, $2, $3) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(user_key.as_i64())
        .bind(started_at)
        .bind(activity)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn close_session(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        minutes: i64,
    ) -> PortResult<SessionRecord> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET ended_at = $1, minutes = $2 \
             WHERE id = $3 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(ended_at)
        .bind(minutes)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("session {session_id}")),
            other => unexpected(other),
        })?;
        Ok(row.to_domain())
    }

    async fn record_incident(
        &self,
        session_id: i64,
        kind: IncidentKind,
    ) -> PortResult<SessionRecord> {
        // The increment happens in SQL so the counter update itself is
        // atomic; the ledger serializes the surrounding read-then-write.
        let column = match kind {
            IncidentKind::BadPosture => "bad_posture_count",
            IncidentKind::TooClose => "too_close_count",
        };
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET {column} = {column} + 1 \
             WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("session {session_id}")),
            other => unexpected(other),
        })?;
        Ok(row.to_domain())
    }

    async fn set_activity(&self, session_id: i64, activity: &str) -> PortResult<SessionRecord> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET activity = $1 \
             WHERE id = $2 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(activity)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("session {session_id}")),
            other => unexpected(other),
        })?;
        Ok(row.to_domain())
    }

    async fn sessions_started_between(
        &self,
        user_key: UserKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_key = $1 AND started_at >= $2 AND started_at <= $3 \
             ORDER BY started_at ASC"
        ))
        .bind(user_key.as_i64())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(rows.into_iter().map(SessionRow::to_domain).collect())
    }

    async fn recent_sessions(
        &self,
        user_key: UserKey,
        limit: i64,
    ) -> PortResult<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_key = $1 \
             ORDER BY started_at DESC LIMIT $2"
        ))
        .bind(user_key.as_i64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        // Newest last, matching the port contract.
        Ok(rows.into_iter().rev().map(SessionRow::to_domain).collect())
    }

    async fn lifetime_totals(&self, user_key: UserKey) -> PortResult<SessionTotals> {
        let row = sqlx::query_as::<_, TotalsRow>(
            "SELECT \
               COUNT(*)::BIGINT AS session_count, \
               COALESCE(SUM(COALESCE(minutes, GREATEST(0::BIGINT, \
                 FLOOR(EXTRACT(EPOCH FROM (COALESCE(ended_at, now()) - started_at)) / 60)::BIGINT))), 0)::BIGINT \
                 AS total_minutes, \
               COALESCE(SUM(bad_posture_count), 0)::BIGINT AS bad_posture_total, \
               COALESCE(SUM(too_close_count), 0)::BIGINT AS too_close_total \
             FROM sessions WHERE user_key = $1",
        )
        .bind(user_key.as_i64())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(SessionTotals {
            session_count: row.session_count,
            total_minutes: row.total_minutes,
            bad_posture_total: row.bad_posture_total,
            too_close_total: row.too_close_total,
        })
    }

    async fn save_score(&self, user_key: UserKey, score: u8) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_scores (user_key, score, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (user_key) DO UPDATE SET score = EXCLUDED.score, updated_at = now()",
        )
        .bind(user_key.as_i64())
        .bind(i32::from(score))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn score(&self, user_key: UserKey) -> PortResult<Option<i32>> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT score FROM user_scores WHERE user_key = $1")
                .bind(user_key.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(row.map(|(score,)| score))
    }
}

//=========================================================================================
// `UserDirectory` and `AuthStore` Trait Implementations
//=========================================================================================

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, username FROM users WHERE LOWER(email) = LOWER($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(UserRow::to_domain))
    }

    async fn find_user_by_id(&self, id: i64) -> PortResult<Option<UserProfile>> {
        let row =
            sqlx::query_as::<_, UserRow>("SELECT id, email, username FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(row.map(UserRow::to_domain))
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> PortResult<UserProfile> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (email, username, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, email, username",
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn credentials_by_email(&self, email: &str) -> PortResult<Option<UserCredentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            "SELECT id, email, username, password_hash FROM users \
             WHERE LOWER(email) = LOWER($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(CredentialsRow::to_domain))
    }

    async fn create_auth_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, token: &str) -> PortResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `FriendDirectory` and `RecommendationStore` Trait Implementations
//=========================================================================================

#[async_trait]
impl FriendDirectory for PgStore {
    async fn friends_of(&self, owner_email: &str) -> PortResult<Vec<FriendRecord>> {
        let rows = sqlx::query_as::<_, FriendRow>(
            "SELECT id, owner_email, friend_key, username, email, display_name FROM friends \
             WHERE owner_email = $1 \
             ORDER BY id DESC LIMIT 200",
        )
        .bind(owner_email)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(rows.into_iter().map(FriendRow::to_domain).collect())
    }

    async fn add_friend(&self, friend: NewFriend) -> PortResult<FriendRecord> {
        let row = sqlx::query_as::<_, FriendRow>(
            "INSERT INTO friends (owner_email, friend_key, username, email, display_name) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (owner_email, friend_key) DO UPDATE SET \
               username = EXCLUDED.username, \
               email = EXCLUDED.email, \
               display_name = EXCLUDED.display_name \
             RETURNING id, owner_email, friend_key, username, email, display_name",
        )
        .bind(&friend.owner_email)
        .bind(friend.friend_key)
        .bind(&friend.username)
        .bind(&friend.email)
        .bind(&friend.display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn latest_recommendation(
        &self,
        user_key: UserKey,
    ) -> PortResult<Option<WeeklyRecommendation>> {
        let row = sqlx::query_as::<_, RecommendationRow>(
            "SELECT user_key, recommendation, model, source_latest_data_at, generated_at \
             FROM weekly_recommendations WHERE user_key = $1",
        )
        .bind(user_key.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(RecommendationRow::to_domain))
    }

    async fn upsert_recommendation(
        &self,
        recommendation: NewRecommendation,
    ) -> PortResult<WeeklyRecommendation> {
        let row = sqlx::query_as::<_, RecommendationRow>(
            "INSERT INTO weekly_recommendations \
               (user_key, recommendation, model, source_latest_data_at, generated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (user_key) DO UPDATE SET \
               recommendation = EXCLUDED.recommendation, \
               model = EXCLUDED.model, \
               source_latest_data_at = EXCLUDED.source_latest_data_at, \
               generated_at = now() \
             RETURNING user_key, recommendation, model, source_latest_data_at, generated_at",
        )
        .bind(recommendation.user_key)
        .bind(&recommendation.recommendation)
        .bind(&recommendation.model)
        .bind(recommendation.source_latest_data_at)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }
}
