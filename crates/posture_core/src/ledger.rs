//! crates/posture_core/src/ledger.rs
//!
//! The session ledger: applies the monitoring event stream onto durable
//! session rows, one state machine per user key (NoOpenSession ⇄ OpenSession).
//!
//! Events may arrive out of timestamp order and more than once. The
//! read-open-row-then-update sequence is a critical section per user key,
//! serialized here through a keyed mutex registry (a single-writer queue per
//! key); two concurrent increments must never read the same pre-update
//! counter. Storage faults degrade to a logged no-op so the ingestion path
//! never crashes on a transient outage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::domain::{EventKind, IncidentKind, SessionRecord, SessionSnapshot, UserKey};
use crate::ports::{PortResult, SessionStore};
use crate::score::compute_score;

pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
    locks: StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Applies one event and returns the resulting session view.
    ///
    /// Returns `None` both for the defined no-op cases (a stop with no
    /// session history) and when storage is unavailable; callers cannot and
    /// should not distinguish the two.
    pub async fn apply_event(
        &self,
        user_key: UserKey,
        kind: EventKind,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> Option<SessionSnapshot> {
        let lock = self.user_lock(user_key);
        let _guard = lock.lock().await;

        match self.apply_locked(user_key, kind, at, activity).await {
            Ok(record) => record.map(|r| SessionSnapshot::from_record(&r, at)),
            Err(err) => {
                warn!(user_key = user_key.as_i64(), ?kind, %err, "event application degraded to no-op");
                None
            }
        }
    }

    fn user_lock(&self, user_key: UserKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(user_key.as_i64())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn apply_locked(
        &self,
        user_key: UserKey,
        kind: EventKind,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<Option<SessionRecord>> {
        match kind {
            EventKind::SessionStart => self.start(user_key, at, activity).await.map(Some),
            EventKind::BadPosture => self
                .incident(user_key, IncidentKind::BadPosture, at, activity)
                .await
                .map(Some),
            EventKind::TooClose => self
                .incident(user_key, IncidentKind::TooClose, at, activity)
                .await
                .map(Some),
            EventKind::ActivitySet => self.activity_set(user_key, at, activity).await.map(Some),
            EventKind::SessionStop => self.stop(user_key, at, activity).await,
        }
    }

    /// SESSION_START: force-close a leaked open session (a crashed monitor
    /// never sent its stop), then open a fresh row at the event timestamp.
    async fn start(
        &self,
        user_key: UserKey,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        if let Some(open) = self.store.open_session(user_key).await? {
            warn!(
                user_key = user_key.as_i64(),
                session_id = open.id,
                "force-closing leaked open session"
            );
            self.close_at(&open, at).await?;
            self.refresh_score(user_key).await?;
        }
        self.store.insert_session(user_key, at, activity).await
    }

    /// BAD_POSTURE / TOO_CLOSE: increment on the open session, bootstrapping
    /// one at the event timestamp when the start event was lost or late.
    async fn incident(
        &self,
        user_key: UserKey,
        kind: IncidentKind,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        let open = self.open_or_bootstrap(user_key, at, activity).await?;
        let record = self.store.record_incident(open.id, kind).await?;
        self.refresh_score(user_key).await?;
        Ok(record)
    }

    /// ACTIVITY_SET: overwrite the label on the open session (last write
    /// wins), bootstrapping one when none is open. Counters and timestamps
    /// stay untouched, so no score refresh.
    async fn activity_set(
        &self,
        user_key: UserKey,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        let open = self.open_or_bootstrap(user_key, at, activity).await?;
        match activity {
            Some(label) if open.activity.as_deref() != Some(label) => {
                self.store.set_activity(open.id, label).await
            }
            _ => Ok(open),
        }
    }

    /// SESSION_STOP: close the open session, or retroactively finalize the
    /// most recent one. With no session history at all this is a safe no-op.
    async fn stop(
        &self,
        user_key: UserKey,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<Option<SessionRecord>> {
        if let Some(open) = self.store.open_session(user_key).await? {
            let mut record = self.close_at(&open, at).await?;
            if let Some(label) = activity {
                record = self.store.set_activity(record.id, label).await?;
            }
            self.refresh_score(user_key).await?;
            return Ok(Some(record));
        }

        let Some(latest) = self.store.latest_session(user_key).await? else {
            return Ok(None);
        };

        let mut record = latest;
        if record.is_open() {
            record = self.close_at(&record, at).await?;
            self.refresh_score(user_key).await?;
        }
        // A duplicate stop leaves finalized timestamps alone, but a carried
        // activity label still lands (preserved last-write-wins behavior).
        if let Some(label) = activity {
            record = self.store.set_activity(record.id, label).await?;
        }
        Ok(Some(record))
    }

    async fn open_or_bootstrap(
        &self,
        user_key: UserKey,
        at: DateTime<Utc>,
        activity: Option<&str>,
    ) -> PortResult<SessionRecord> {
        if let Some(open) = self.store.open_session(user_key).await? {
            return Ok(open);
        }
        self.store.insert_session(user_key, at, activity).await
    }

    async fn close_at(
        &self,
        open: &SessionRecord,
        at: DateTime<Utc>,
    ) -> PortResult<SessionRecord> {
        let ended_at = open.ended_at.map_or(at, |existing| existing.max(at));
        let minutes = ((ended_at - open.started_at).num_seconds() / 60).max(0);
        self.store.close_session(open.id, ended_at, minutes).await
    }

    /// Recomputes the score from full historical totals and persists it.
    /// Never incremental, so the stored value is reproducible from rows.
    async fn refresh_score(&self, user_key: UserKey) -> PortResult<u8> {
        let totals = self.store.lifetime_totals(user_key).await?;
        let score = compute_score(
            totals.total_minutes,
            totals.bad_posture_total,
            totals.too_close_total,
        );
        self.store.save_score(user_key, score).await?;
        Ok(score)
    }
}
