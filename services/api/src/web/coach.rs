//! services/api/src/web/coach.rs
//!
//! The AI coach endpoints: the cached weekly recommendation and a free-form
//! chat. Model failures never surface as errors; both endpoints fall back to
//! deterministic text.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::web::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachQuery {
    pub user_id: Option<String>,
}

/// User identity for coach requests: query parameter first, then the
/// identity headers the dashboard sends, then the demo identity.
fn normalize_user_identifier(query: &CoachQuery, headers: &HeaderMap) -> String {
    let header_user = headers
        .get("x-user-email")
        .or_else(|| headers.get("x-user-id"))
        .and_then(|v| v.to_str().ok());
    let candidate = query
        .user_id
        .as_deref()
        .or(header_user)
        .unwrap_or("demo")
        .trim()
        .to_lowercase();
    if candidate.is_empty() {
        "demo".to_string()
    } else {
        candidate
    }
}

/// Cached weekly recommendation, regenerated when a week of new session data
/// has accumulated.
#[utoipa::path(
    get,
    path = "/coach/recommendation",
    params(
        ("userId" = Option<String>, Query, description = "User identifier; defaults to headers, then demo")
    ),
    responses(
        (status = 200, description = "Recommendation payload; ok=false only when storage is unavailable")
    )
)]
pub async fn recommendation_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CoachQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = normalize_user_identifier(&query, &headers);
    let user_key = state.resolver.resolve(&user_id).await;
    let reply = state
        .coach
        .weekly_recommendation(user_key, &user_id, Utc::now())
        .await;
    Json(reply)
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: Option<String>,
}

fn chat_fallback(question: &str) -> String {
    [
        "I can answer general questions, but the coach model is currently unavailable.",
        "",
        &format!("Your question: {question}"),
        "",
        "Try again in a few seconds. If this keeps happening, verify the model endpoint is \
         running and reachable.",
    ]
    .join("\n")
}

/// Free-form coach chat; answers in plain text.
#[utoipa::path(
    post,
    path = "/coach",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Plain-text answer"),
        (status = 400, description = "Missing question")
    )
)]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let question = body
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Missing 'question' in request body.".to_string(),
        ))?;

    let answer = match state.coach_model.answer(question).await {
        Ok(text) => text,
        Err(err) => {
            error!("Coach chat model call failed: {:?}", err);
            chat_fallback(question)
        }
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        answer,
    ))
}
