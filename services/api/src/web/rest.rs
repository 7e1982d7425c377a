//! services/api/src/web/rest.rs
//!
//! Axum handlers for the REST API endpoints and the master definition of the
//! OpenAPI specification. Loose JSON at the edge is parsed into strict domain
//! types here, before anything reaches the session ledger.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use posture_core::domain::{EventKind, LeaderboardEntry, NewFriend, SessionSnapshot, StatsRange};
use posture_core::identity::stable_hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        post_event_handler,
        stats_summary_handler,
        leaderboard_handler,
        list_friends_handler,
        add_friend_handler,
        profile_handler,
        crate::web::coach::recommendation_handler,
        crate::web::coach::chat_handler,
    ),
    components(schemas(
        crate::web::auth::SignupRequest,
        crate::web::auth::LoginRequest,
        crate::web::auth::AuthResponse,
        EventBody,
        AddFriendRequest,
        FriendPayload,
        ProfileResponse,
        crate::web::coach::ChatRequest,
    )),
    tags(
        (name = "Posture Tracker API", description = "Event ingestion, statistics, leaderboard and coach endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Event Ingestion
//=========================================================================================

/// Loosely-typed event body as posted by the monitor process or browser.
/// Everything but `type` is optional and defaulted.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Epoch seconds; defaults to the server clock.
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub activity: Option<String>,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub ok: bool,
    pub event: Option<SessionSnapshot>,
}

/// Ingest one monitoring event.
#[utoipa::path(
    post,
    path = "/events",
    request_body = EventBody,
    responses(
        (status = 200, description = "Event applied (event is null for the defined no-op cases)"),
        (status = 400, description = "Missing or invalid event type")
    )
)]
pub async fn post_event_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EventBody>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Malformed or absent JSON degrades to an empty body, the same as the
    // monitor sending `{}`; the strict type check below still applies.
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let kind = body
        .kind
        .as_deref()
        .and_then(|raw| raw.parse::<EventKind>().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Invalid or missing \"type\".".to_string(),
        ))?;

    let user_id = body
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("demo");
    let at = body
        .ts
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);
    let activity = body
        .activity
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let user_key = state.resolver.resolve(user_id).await;
    let event = state.ledger.apply_event(user_key, kind, at, activity).await;
    Ok(Json(EventResponse { ok: true, event }))
}

//=========================================================================================
// Statistics
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub user_id: Option<String>,
    pub range: Option<String>,
}

#[derive(Serialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub user_id: String,
    pub time_range: TimeRange,
    pub range: &'static str,
    #[serde(flatten)]
    pub summary: posture_core::domain::StatsSummary,
}

/// Day/week summary of the user's sessions.
#[utoipa::path(
    get,
    path = "/stats/summary",
    params(
        ("userId" = Option<String>, Query, description = "User identifier (email or opaque id); defaults to demo"),
        ("range" = Option<String>, Query, description = "day (default) or week")
    ),
    responses(
        (status = 200, description = "Windowed totals, activity breakdown and chart buckets")
    )
)]
pub async fn stats_summary_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let user_id = query
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("demo")
        .to_string();
    let range = match query.range.as_deref() {
        Some("week") => StatsRange::Week,
        _ => StatsRange::Day,
    };

    let now = Utc::now();
    let user_key = state.resolver.resolve(&user_id).await;
    let summary = state.stats.summarize(user_key, range, now).await;

    Json(StatsResponse {
        user_id,
        time_range: TimeRange {
            from: now.timestamp() - range.window_seconds(),
            to: now.timestamp(),
        },
        range: range.as_str(),
        summary,
    })
}

//=========================================================================================
// Leaderboard
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub user_email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub updated_at: i64,
    pub entries: Vec<LeaderboardEntry>,
}

/// Friends leaderboard for the given owner, best score first.
#[utoipa::path(
    get,
    path = "/leaderboard",
    params(
        ("userEmail" = String, Query, description = "Email identifying the friend list owner")
    ),
    responses(
        (status = 200, description = "Ranked friend scores"),
        (status = 400, description = "Missing userEmail")
    )
)]
pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = query
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Missing 'userEmail' query parameter.".to_string(),
        ))?;

    let entries = state.leaderboard.entries(owner).await;
    Ok(Json(LeaderboardResponse {
        updated_at: Utc::now().timestamp(),
        entries,
    }))
}

//=========================================================================================
// Friends Registry
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendsQuery {
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddFriendRequest {
    pub user_email: Option<String>,
    /// Email or username of the friend to add.
    pub friend_identifier: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FriendPayload {
    pub id: i64,
    pub friend_id: i64,
    pub display_name: String,
    pub username: String,
    pub email: String,
}

impl From<posture_core::domain::FriendRecord> for FriendPayload {
    fn from(record: posture_core::domain::FriendRecord) -> Self {
        Self {
            id: record.id,
            friend_id: record.friend_key,
            display_name: record.display_name,
            username: record.username.unwrap_or_default(),
            email: record.email.unwrap_or_default(),
        }
    }
}

/// List the owner's friends.
#[utoipa::path(
    get,
    path = "/friends",
    params(
        ("userEmail" = String, Query, description = "Email identifying the friend list owner")
    ),
    responses(
        (status = 200, description = "Friend list"),
        (status = 400, description = "Missing userEmail")
    )
)]
pub async fn list_friends_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FriendsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = query
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Missing 'userEmail' query parameter.".to_string(),
        ))?;

    let friends = state.friends.friends_of(&owner).await.map_err(|e| {
        error!("Failed to list friends: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to list friends".to_string(),
        )
    })?;
    let payload: Vec<FriendPayload> = friends.into_iter().map(FriendPayload::from).collect();
    Ok(Json(payload))
}

/// Register a friend by email or username.
#[utoipa::path(
    post,
    path = "/friends",
    request_body = AddFriendRequest,
    responses(
        (status = 201, description = "Friend registered", body = FriendPayload),
        (status = 400, description = "Missing owner email or friend identifier"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn add_friend_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFriendRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let owner = req
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Missing 'userEmail' in request body.".to_string(),
        ))?;
    let identifier = req
        .friend_identifier
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Missing 'friendIdentifier' in request body.".to_string(),
        ))?;

    let friend = if identifier.contains('@') {
        match state.users.find_user_by_email(&identifier).await {
            Ok(Some(profile)) => NewFriend {
                owner_email: owner,
                friend_key: profile.id,
                display_name: profile.display_name().to_string(),
                username: profile.username,
                email: Some(profile.email),
            },
            // Unregistered friends still get a stable row keyed by the same
            // hash the identity resolver would produce for them.
            _ => NewFriend {
                owner_email: owner,
                friend_key: stable_hash(&identifier),
                display_name: identifier
                    .split('@')
                    .next()
                    .unwrap_or(&identifier)
                    .to_string(),
                username: None,
                email: Some(identifier.clone()),
            },
        }
    } else {
        NewFriend {
            owner_email: owner,
            friend_key: stable_hash(&identifier),
            display_name: identifier.clone(),
            username: Some(identifier.clone()),
            email: None,
        }
    };

    let record = state.friends.add_friend(friend).await.map_err(|e| {
        error!("Failed to add friend: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to add friend".to_string(),
        )
    })?;
    Ok((StatusCode::CREATED, Json(FriendPayload::from(record))))
}

//=========================================================================================
// Profile
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: i64,
    pub email: String,
    pub username: Option<String>,
    pub score: i32,
}

/// Profile of the authenticated user, including the current score.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Authenticated user's profile", body = ProfileResponse),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Account no longer exists")
    )
)]
pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .users
        .find_user_by_id(user_id)
        .await
        .map_err(|e| {
            error!("Failed to load profile: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load profile".to_string(),
            )
        })?
        .ok_or((StatusCode::NOT_FOUND, "Account not found".to_string()))?;

    let score = state
        .sessions
        .score(posture_core::domain::UserKey::registered(user_id))
        .await
        .ok()
        .flatten()
        .unwrap_or(0);

    Ok(Json(ProfileResponse {
        id: profile.id,
        email: profile.email,
        username: profile.username,
        score,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_body_tolerates_missing_fields() {
        let body: EventBody = serde_json::from_str("{}").unwrap();
        assert!(body.user_id.is_none());
        assert!(body.kind.is_none());
        assert!(body.ts.is_none());
        assert!(body.activity.is_none());
    }

    #[test]
    fn event_body_reads_the_wire_field_names() {
        let body: EventBody = serde_json::from_str(
            r#"{"userId": "ada@example.com", "type": "BAD_POSTURE", "ts": 1700000000, "activity": "reading"}"#,
        )
        .unwrap();
        assert_eq!(body.user_id.as_deref(), Some("ada@example.com"));
        assert_eq!(
            body.kind.as_deref().unwrap().parse::<EventKind>().unwrap(),
            EventKind::BadPosture
        );
        assert_eq!(body.ts, Some(1_700_000_000));
        assert_eq!(body.activity.as_deref(), Some("reading"));
    }

    #[test]
    fn unknown_event_kind_fails_strict_parsing() {
        let body: EventBody =
            serde_json::from_str(r#"{"type": "SESSION_PAUSE"}"#).unwrap();
        assert!(body.kind.as_deref().unwrap().parse::<EventKind>().is_err());
    }
}
