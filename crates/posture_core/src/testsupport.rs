//! crates/posture_core/src/testsupport.rs
//!
//! In-memory port implementations used by the core test suites. Each
//! operation takes an internal lock, matching the storage-layer guarantee
//! that individual reads/writes are serialized; the interleaving hazards the
//! ledger guards against live between operations, not inside them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    FriendRecord, IncidentKind, NewFriend, NewRecommendation, SessionRecord, SessionTotals,
    UserKey, UserProfile, WeeklyRecommendation,
};
use crate::ports::{
    CoachModel, FriendDirectory, PortError, PortResult, RecommendationStore, SessionStore,
    UserDirectory,
};

#[derive(Default)]
struct SessionsInner {
    next_id: i64,
    sessions: Vec<SessionRecord>,
    scores: HashMap<i64, i32>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: StdMutex<SessionsInner>,
    failing: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail until reset, simulating an
    /// unavailable storage backend.
    pub fn fail_next_operations(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn all_sessions(&self, user_key: UserKey) -> Vec<SessionRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .iter()
            .filter(|s| s.user_key == user_key.as_i64())
            .cloned()
            .collect()
    }

    pub fn open_session_count(&self, user_key: UserKey) -> usize {
        self.all_sessions(user_key)
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    pub fn persisted_score(&self, user_key: UserKey) -> Option<i32> {
        let inner = self.inner.lock().unwrap();
        inner.scores.get(&user_key.as_i64()).copied()
    }

    /// Seeds a pre-existing session row, bypassing the ledger.
    pub fn push_session(&self, record: SessionRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id = inner.next_id.max(record.id);
        inner.sessions.push(record);
    }

    pub fn set_score(&self, user_key: UserKey, score: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.scores.insert(user_key.as_i64(), score);
    }

    fn guard(&self) -> PortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PortError::Unexpected("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn update<F>(&self, session_id: i64, apply: F) -> PortResult<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?;
        apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn open_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>> {
        self.guard()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.user_key == user_key.as_i64() && s.is_open())
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn latest_session(&self, user_key: UserKey) -> PortResult<Option<SessionRecord>> {
        self.guard()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.user_key == user_key.as_i64())
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn insert_session(
        &self,
        user_key: UserKey,
        started_at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        self.guard()?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let record = SessionRecord {
            id: inner.next_id,
            user_key: user_key.as_i64(),
            started_at,
            ended_at: None,
            activity: activity.map(str::to_string),
            bad_posture_count: 0,
            too_close_count: 0,
            minutes: None,
        };
        inner.sessions.push(record.clone());
        Ok(record)
    }

    async fn close_session(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        minutes: i64,
    ) -> PortResult<SessionRecord> {
        self.guard()?;
        self.update(session_id, |record| {
            record.ended_at = Some(ended_at);
            record.minutes = Some(minutes);
        })
    }

    async fn record_incident(
        &self,
        session_id: i64,
        kind: IncidentKind,
    ) -> PortResult<SessionRecord> {
        self.guard()?;
        self.update(session_id, |record| match kind {
            IncidentKind::BadPosture => record.bad_posture_count += 1,
            IncidentKind::TooClose => record.too_close_count += 1,
        })
    }

    async fn set_activity(&self, session_id: i64, activity: &str) -> PortResult<SessionRecord> {
        self.guard()?;
        self.update(session_id, |record| {
            record.activity = Some(activity.to_string());
        })
    }

    async fn sessions_started_between(
        &self,
        user_key: UserKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<SessionRecord>> {
        self.guard()?;
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<SessionRecord> = inner
            .sessions
            .iter()
            .filter(|s| {
                s.user_key == user_key.as_i64() && s.started_at >= from && s.started_at <= to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.started_at);
        Ok(rows)
    }

    async fn recent_sessions(
        &self,
        user_key: UserKey,
        limit: i64,
    ) -> PortResult<Vec<SessionRecord>> {
        self.guard()?;
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<SessionRecord> = inner
            .sessions
            .iter()
            .filter(|s| s.user_key == user_key.as_i64())
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.started_at);
        let skip = rows.len().saturating_sub(limit as usize);
        Ok(rows.split_off(skip))
    }

    async fn lifetime_totals(&self, user_key: UserKey) -> PortResult<SessionTotals> {
        self.guard()?;
        let now = Utc::now();
        let inner = self.inner.lock().unwrap();
        let mut totals = SessionTotals::default();
        for session in inner
            .sessions
            .iter()
            .filter(|s| s.user_key == user_key.as_i64())
        {
            totals.session_count += 1;
            totals.total_minutes += session.duration_minutes(now);
            totals.bad_posture_total += i64::from(session.bad_posture_count);
            totals.too_close_total += i64::from(session.too_close_count);
        }
        Ok(totals)
    }

    async fn save_score(&self, user_key: UserKey, score: u8) -> PortResult<()> {
        self.guard()?;
        let mut inner = self.inner.lock().unwrap();
        inner.scores.insert(user_key.as_i64(), i32::from(score));
        Ok(())
    }

    async fn score(&self, user_key: UserKey) -> PortResult<Option<i32>> {
        self.guard()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.scores.get(&user_key.as_i64()).copied())
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: StdMutex<Vec<UserProfile>>,
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<UserProfile>> {
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> PortResult<Option<UserProfile>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryFriendDirectory {
    friends: StdMutex<Vec<FriendRecord>>,
}

impl MemoryFriendDirectory {
    pub fn with_friends(friends: Vec<FriendRecord>) -> Self {
        Self {
            friends: StdMutex::new(friends),
        }
    }
}

#[async_trait]
impl FriendDirectory for MemoryFriendDirectory {
    async fn friends_of(&self, owner_email: &str) -> PortResult<Vec<FriendRecord>> {
        let friends = self.friends.lock().unwrap();
        Ok(friends
            .iter()
            .filter(|f| f.owner_email == owner_email)
            .cloned()
            .collect())
    }

    async fn add_friend(&self, friend: NewFriend) -> PortResult<FriendRecord> {
        let mut friends = self.friends.lock().unwrap();
        let record = FriendRecord {
            id: friends.len() as i64 + 1,
            owner_email: friend.owner_email,
            friend_key: friend.friend_key,
            username: friend.username,
            email: friend.email,
            display_name: friend.display_name,
        };
        friends.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryRecommendationStore {
    rows: StdMutex<HashMap<i64, WeeklyRecommendation>>,
}

impl MemoryRecommendationStore {
    pub fn seed(&self, row: WeeklyRecommendation) {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(row.user_key, row);
    }

    pub fn stored(&self, user_key: UserKey) -> Option<WeeklyRecommendation> {
        let rows = self.rows.lock().unwrap();
        rows.get(&user_key.as_i64()).cloned()
    }
}

#[async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn latest_recommendation(
        &self,
        user_key: UserKey,
    ) -> PortResult<Option<WeeklyRecommendation>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&user_key.as_i64()).cloned())
    }

    async fn upsert_recommendation(
        &self,
        recommendation: NewRecommendation,
    ) -> PortResult<WeeklyRecommendation> {
        let mut rows = self.rows.lock().unwrap();
        let row = WeeklyRecommendation {
            user_key: recommendation.user_key,
            recommendation: recommendation.recommendation,
            model: recommendation.model,
            source_latest_data_at: recommendation.source_latest_data_at,
            generated_at: Utc::now(),
        };
        rows.insert(row.user_key, row.clone());
        Ok(row)
    }
}

/// Scripted coach model: answers with a fixed text, or fails when none is
/// configured.
#[derive(Default)]
pub struct ScriptedCoachModel {
    reply: Option<String>,
}

impl ScriptedCoachModel {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { reply: None }
    }
}

#[async_trait]
impl CoachModel for ScriptedCoachModel {
    async fn weekly_recommendation(&self, _prompt: &str) -> PortResult<String> {
        self.reply
            .clone()
            .ok_or_else(|| PortError::Unexpected("model unavailable".to_string()))
    }

    async fn answer(&self, _question: &str) -> PortResult<String> {
        self.reply
            .clone()
            .ok_or_else(|| PortError::Unexpected("model unavailable".to_string()))
    }
}

