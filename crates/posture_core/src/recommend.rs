//! crates/posture_core/src/recommend.rs
//!
//! The weekly coach: memoizes one LLM-generated recommendation per user,
//! regenerating only when at least a week of new session data has arrived
//! since the cached generation. Generator failures always recover locally
//! through a deterministic template; the caller never sees an error.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use crate::domain::{CoachReply, NewRecommendation, SessionRecord, UserKey};
use crate::ports::{
    CoachModel, PortResult, RecommendationStore, SessionStore, UserDirectory,
};

/// Session rows included in the generation prompt.
const PROMPT_SESSION_LIMIT: i64 = 12;

const NO_DATA_MESSAGE: &str =
    "No monitoring data yet. Start your first session to receive a weekly recommendation.";

const UNAVAILABLE_MESSAGE: &str =
    "Unable to load weekly recommendation right now. Please try again shortly.";

/// Deterministic recommendation used whenever the model call fails. Favors
/// screen-distance advice when too-close incidents dominate, a simple
/// exercise routine otherwise.
pub fn fallback_recommendation(
    display_name: &str,
    bad_posture_total: i64,
    too_close_total: i64,
) -> String {
    if too_close_total > bad_posture_total {
        format!(
            "Weekly Recommendation for {display_name}: Daily 20-minute brisk walk after lunch. \
             Keep your monitor at arm's length and follow the 20-20-20 eye rule to reduce \
             too-close events."
        )
    } else {
        format!(
            "Weekly Recommendation for {display_name}: Do 2 sets of 10 bodyweight squats every \
             day (morning and evening). Pair this with a posture reset every 25 minutes: \
             shoulders back, chin neutral, feet grounded."
        )
    }
}

#[derive(Clone)]
pub struct WeeklyCoach {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    cache: Arc<dyn RecommendationStore>,
    model: Arc<dyn CoachModel>,
    model_name: String,
}

impl WeeklyCoach {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        cache: Arc<dyn RecommendationStore>,
        model: Arc<dyn CoachModel>,
        model_name: String,
    ) -> Self {
        Self {
            sessions,
            users,
            cache,
            model,
            model_name,
        }
    }

    /// Returns the cached recommendation, or regenerates it when a week of
    /// new session data has accumulated. Storage faults degrade to a polite
    /// retry message with `ok = false`.
    pub async fn weekly_recommendation(
        &self,
        user_key: UserKey,
        raw_user: &str,
        now: DateTime<Utc>,
    ) -> CoachReply {
        match self.refresh(user_key, raw_user, now).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(user_key = user_key.as_i64(), %err, "weekly recommendation unavailable");
                CoachReply {
                    ok: false,
                    user_id: raw_user.to_string(),
                    has_data: false,
                    updated: false,
                    recommendation: UNAVAILABLE_MESSAGE.to_string(),
                    generated_at: None,
                }
            }
        }
    }

    async fn refresh(
        &self,
        user_key: UserKey,
        raw_user: &str,
        now: DateTime<Utc>,
    ) -> PortResult<CoachReply> {
        let totals = self.sessions.lifetime_totals(user_key).await?;
        let existing = self.cache.latest_recommendation(user_key).await?;

        if totals.session_count == 0 {
            return Ok(CoachReply {
                ok: true,
                user_id: raw_user.to_string(),
                has_data: false,
                updated: false,
                recommendation: NO_DATA_MESSAGE.to_string(),
                generated_at: existing.map(|e| e.generated_at.timestamp()),
            });
        }

        let latest_data_at = self
            .sessions
            .latest_session(user_key)
            .await?
            .map(|session| session.latest_data_at());

        // Serve the cache unless a week of new data arrived since generation.
        // A cache row without a source timestamp always regenerates.
        if let (Some(cached), Some(latest)) = (&existing, latest_data_at) {
            if let Some(source) = cached.source_latest_data_at {
                if latest - source < Duration::days(7) {
                    return Ok(CoachReply {
                        ok: true,
                        user_id: raw_user.to_string(),
                        has_data: true,
                        updated: false,
                        recommendation: cached.recommendation.clone(),
                        generated_at: Some(cached.generated_at.timestamp()),
                    });
                }
            }
        }

        let profile = self.users.find_user_by_id(user_key.as_i64()).await?;
        let display_name = profile
            .as_ref()
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| raw_user.to_string());

        let recent = self
            .sessions
            .recent_sessions(user_key, PROMPT_SESSION_LIMIT)
            .await?;
        let prompt = build_prompt(&display_name, &recent, now);

        let recommendation = match self.model.weekly_recommendation(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(user_key = user_key.as_i64(), %err, "coach model failed, using fallback");
                fallback_recommendation(
                    &display_name,
                    totals.bad_posture_total,
                    totals.too_close_total,
                )
            }
        };

        let generated_at = match self
            .cache
            .upsert_recommendation(NewRecommendation {
                user_key: user_key.as_i64(),
                recommendation: recommendation.clone(),
                model: self.model_name.clone(),
                source_latest_data_at: latest_data_at,
            })
            .await
        {
            Ok(saved) => saved.generated_at.timestamp(),
            Err(err) => {
                // The advisory text still reaches the user; only the cache
                // write is lost.
                warn!(user_key = user_key.as_i64(), %err, "recommendation cache write failed");
                now.timestamp()
            }
        };

        Ok(CoachReply {
            ok: true,
            user_id: raw_user.to_string(),
            has_data: true,
            updated: true,
            recommendation,
            generated_at: Some(generated_at),
        })
    }
}

/// Bounded, serializable activity summary handed to the model.
fn build_prompt(display_name: &str, recent: &[SessionRecord], now: DateTime<Utc>) -> String {
    let rows: Vec<_> = recent
        .iter()
        .map(|session| {
            json!({
                "start": session.started_at.timestamp(),
                "end": session.ended_at.map(|t| t.timestamp()),
                "activity": session.activity,
                "bad_posture_count": session.bad_posture_count,
                "too_close_count": session.too_close_count,
                "minutes": session.duration_minutes(now),
            })
        })
        .collect();

    [
        format!("Recent monitoring sessions: {}", json!(rows)),
        format!(
            "This is {display_name}, looking to improve their posture and fitness in small \
             steps. bad_posture_count is how often bad posture was detected per session and \
             too_close_count how often they sat too close to the monitor."
        ),
        "Please suggest one exercise, activity, or diet action to improve their health."
            .to_string(),
        "Return only one concise weekly recommendation in plain text.".to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WeeklyRecommendation;
    use crate::testsupport::{
        MemoryRecommendationStore, MemorySessionStore, MemoryUserDirectory, ScriptedCoachModel,
    };
    use chrono::TimeZone;

    fn seeded_store(user_key: i64, bad: i32, too_close: i32) -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        let started = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        store.push_session(SessionRecord {
            id: 1,
            user_key,
            started_at: started,
            ended_at: Some(started + Duration::minutes(45)),
            activity: Some("coding".to_string()),
            bad_posture_count: bad,
            too_close_count: too_close,
            minutes: Some(45),
        });
        store
    }

    fn coach(
        sessions: Arc<MemorySessionStore>,
        cache: Arc<MemoryRecommendationStore>,
        model: ScriptedCoachModel,
    ) -> WeeklyCoach {
        WeeklyCoach::new(
            sessions,
            Arc::new(MemoryUserDirectory::default()),
            cache,
            Arc::new(model),
            "llama3.2".to_string(),
        )
    }

    #[tokio::test]
    async fn no_history_reports_has_data_false_without_generating() {
        let cache = Arc::new(MemoryRecommendationStore::default());
        let coach = coach(
            Arc::new(MemorySessionStore::new()),
            cache.clone(),
            ScriptedCoachModel::failing(),
        );
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(1), "demo", now)
            .await;

        assert!(reply.ok);
        assert!(!reply.has_data);
        assert!(!reply.updated);
        assert_eq!(reply.recommendation, NO_DATA_MESSAGE);
        assert!(cache.stored(UserKey::registered(1)).is_none());
    }

    #[tokio::test]
    async fn first_request_generates_and_caches() {
        let sessions = seeded_store(2, 3, 0);
        let cache = Arc::new(MemoryRecommendationStore::default());
        let coach = coach(
            sessions,
            cache.clone(),
            ScriptedCoachModel::replying("Try a standing desk for an hour a day."),
        );
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(2), "two@example.com", now)
            .await;

        assert!(reply.ok && reply.has_data && reply.updated);
        assert_eq!(reply.recommendation, "Try a standing desk for an hour a day.");
        let stored = cache.stored(UserKey::registered(2)).unwrap();
        assert_eq!(stored.model, "llama3.2");
        assert!(stored.source_latest_data_at.is_some());
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_regeneration() {
        let sessions = seeded_store(3, 1, 0);
        let cache = Arc::new(MemoryRecommendationStore::default());
        let generated = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
        cache.seed(WeeklyRecommendation {
            user_key: 3,
            recommendation: "Cached advice.".to_string(),
            model: "llama3.2".to_string(),
            // Matches the latest session data, so nothing new arrived since.
            source_latest_data_at: Some(
                Utc.with_ymd_and_hms(2025, 6, 1, 9, 45, 0).unwrap(),
            ),
            generated_at: generated,
        });
        // A failing model proves the generator is never consulted.
        let coach = coach(sessions, cache, ScriptedCoachModel::failing());
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(3), "three@example.com", now)
            .await;

        assert!(reply.ok && reply.has_data);
        assert!(!reply.updated);
        assert_eq!(reply.recommendation, "Cached advice.");
        assert_eq!(reply.generated_at, Some(generated.timestamp()));
    }

    #[tokio::test]
    async fn week_old_source_data_triggers_regeneration() {
        let sessions = seeded_store(4, 1, 0);
        let cache = Arc::new(MemoryRecommendationStore::default());
        cache.seed(WeeklyRecommendation {
            user_key: 4,
            recommendation: "Stale advice.".to_string(),
            model: "llama3.2".to_string(),
            // Eight days behind the latest session data.
            source_latest_data_at: Some(
                Utc.with_ymd_and_hms(2025, 5, 24, 9, 45, 0).unwrap(),
            ),
            generated_at: Utc.with_ymd_and_hms(2025, 5, 24, 10, 0, 0).unwrap(),
        });
        let coach = coach(
            sessions,
            cache.clone(),
            ScriptedCoachModel::replying("Fresh advice."),
        );
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(4), "four@example.com", now)
            .await;

        assert!(reply.updated);
        assert_eq!(reply.recommendation, "Fresh advice.");
        assert_eq!(
            cache.stored(UserKey::registered(4)).unwrap().recommendation,
            "Fresh advice."
        );
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_distance_advice_when_too_close_dominates() {
        let sessions = seeded_store(5, 1, 4);
        let cache = Arc::new(MemoryRecommendationStore::default());
        let coach = coach(sessions, cache, ScriptedCoachModel::failing());
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(5), "five@example.com", now)
            .await;

        assert!(reply.ok && reply.updated);
        assert!(reply.recommendation.contains("20-20-20"));
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_exercise_advice_otherwise() {
        let sessions = seeded_store(6, 4, 1);
        let cache = Arc::new(MemoryRecommendationStore::default());
        let coach = coach(sessions, cache, ScriptedCoachModel::failing());
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(6), "six@example.com", now)
            .await;

        assert!(reply.recommendation.contains("squats"));
    }

    #[tokio::test]
    async fn storage_outage_degrades_to_retry_message() {
        let sessions = Arc::new(MemorySessionStore::new());
        sessions.fail_next_operations(true);
        let cache = Arc::new(MemoryRecommendationStore::default());
        let coach = coach(sessions, cache, ScriptedCoachModel::failing());
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let reply = coach
            .weekly_recommendation(UserKey::registered(7), "seven@example.com", now)
            .await;

        assert!(!reply.ok);
        assert_eq!(reply.recommendation, UNAVAILABLE_MESSAGE);
        assert!(reply.generated_at.is_none());
    }
}
