//! REST API
//!
//! JSON routes over one [`ProgressTracker`]. Content counts (sections,
//! levels, exercises) come from the front end with each request.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::{Stream, StreamExt};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use codequest_common::{ActivityKind, Difficulty, ProgressKey, QuestError, SessionError};

use crate::domain::leveling::XpLedger;
use crate::domain::profile::{AgeBand, Preferences};
use crate::service::tracker::ProgressTracker;

type AppState = Arc<ProgressTracker>;

/// Error response: status from the error kind, JSON body
#[derive(Debug)]
pub struct ApiError(QuestError);

impl<E> From<E> for ApiError
where
    E: Into<QuestError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QuestError::Session(_) => StatusCode::UNAUTHORIZED,
            QuestError::Key(_) | QuestError::Validation(_) => StatusCode::BAD_REQUEST,
            QuestError::Conflict(_) => StatusCode::CONFLICT,
            QuestError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuestError::Config(_) | QuestError::Serialization(_) | QuestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }

        let body = json!({
            "error": self.0.to_string(),
            "onboarding": self.0.requires_onboarding(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct SignInRequest {
    code: String,
}

#[derive(Deserialize)]
struct OnboardRequest {
    code: String,
    display_name: String,
    age_band: AgeBand,
}

#[derive(Deserialize)]
struct AwardRequest {
    amount: u64,
}

#[derive(Deserialize)]
struct TutorialRequest {
    total_sections: usize,
}

#[derive(Deserialize)]
struct GameRequest {
    difficulty: Difficulty,
    total_levels: usize,
}

#[derive(Deserialize)]
struct AnswerRequest {
    correct: bool,
}

#[derive(Deserialize)]
struct SandboxRequest {
    total_exercises: usize,
}

#[derive(Deserialize)]
struct SubmissionRequest {
    exercise: usize,
    submission: String,
    reference: String,
}

/// Build the router with CORS for the browser front end
pub fn router(tracker: Arc<ProgressTracker>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/version", get(version))
        // Session
        .route("/api/v1/onboarding", post(onboard))
        .route("/api/v1/session", post(sign_in).delete(sign_out).put(reload))
        // Profile
        .route("/api/v1/profile", get(profile))
        .route("/api/v1/profile/preferences", put(update_preferences))
        .route("/api/v1/profile/xp", post(award_xp))
        .route("/api/v1/achievements", get(achievements))
        .route("/api/v1/events", get(events))
        // Progress
        .route("/api/v1/progress/:module/:language", get(progress))
        .route("/api/v1/progress/:module/:language/tutorial", post(open_tutorial))
        .route(
            "/api/v1/progress/:module/:language/tutorial/sections/:section",
            post(complete_section),
        )
        .route("/api/v1/progress/:module/:language/game", post(start_game))
        .route(
            "/api/v1/progress/:module/:language/game/levels/:level",
            post(answer_level),
        )
        .route("/api/v1/progress/:module/:language/game/hints", post(use_hint))
        .route(
            "/api/v1/progress/:module/:language/sandbox/:difficulty",
            post(enter_sandbox).delete(retry_sandbox),
        )
        .route(
            "/api/v1/progress/:module/:language/sandbox/:difficulty/submissions",
            post(submit_exercise),
        )
        .route("/api/v1/progress/:module/:language/next/:kind", get(next_difficulty))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(tracker)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn version() -> Json<Value> {
    Json(json!({
        "service": "codequest-mastery",
        "version": crate::MASTERY_VERSION,
    }))
}

async fn onboard(
    State(tracker): State<AppState>,
    Json(req): Json<OnboardRequest>,
) -> ApiResult<Value> {
    let today = chrono::Local::now().date_naive();
    let sign_in = tracker
        .onboard(&req.code, &req.display_name, req.age_band, today)
        .await?;
    Ok(Json(json!(sign_in)))
}

async fn sign_in(
    State(tracker): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> ApiResult<Value> {
    let sign_in = tracker.sign_in_today(&req.code).await?;
    Ok(Json(json!(sign_in)))
}

async fn sign_out(State(tracker): State<AppState>) -> StatusCode {
    tracker.sign_out();
    StatusCode::NO_CONTENT
}

async fn reload(State(tracker): State<AppState>) -> ApiResult<Value> {
    Ok(Json(json!(tracker.reload().await?)))
}

async fn profile(State(tracker): State<AppState>) -> ApiResult<Value> {
    let profile = tracker.profile().ok_or(SessionError::Missing)?;
    let ledger = XpLedger::new(tracker.config().xp.level_base_xp);

    Ok(Json(json!({
        "profile": profile,
        "xp_to_next_level": ledger.xp_to_next_level(profile.total_xp),
    })))
}

async fn update_preferences(
    State(tracker): State<AppState>,
    Json(preferences): Json<Preferences>,
) -> ApiResult<Value> {
    Ok(Json(json!(tracker.update_preferences(preferences).await?)))
}

async fn award_xp(
    State(tracker): State<AppState>,
    Json(req): Json<AwardRequest>,
) -> ApiResult<Value> {
    Ok(Json(json!(tracker.award_xp(req.amount).await?)))
}

async fn achievements(State(tracker): State<AppState>) -> ApiResult<Value> {
    let unlocked = tracker.evaluate_achievements().await?;
    let catalog: Vec<Value> = tracker
        .achievements()
        .iter()
        .map(|achievement| {
            json!({
                "id": achievement.id,
                "label": achievement.label,
                "description": achievement.description,
                "unlocked": unlocked.value.contains(&achievement.id),
            })
        })
        .collect();

    Ok(Json(json!({
        "achievements": catalog,
        "synced": unlocked.synced,
    })))
}

/// Tracker events as server-sent events
async fn events(
    State(tracker): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = tracker
        .events()
        .filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "Event subscriber lagged");
                None
            }
        })
        .map(|event| Event::default().json_data(event));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn progress(
    State(tracker): State<AppState>,
    Path((module, language)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    Ok(Json(json!(tracker.progress(&key).await?)))
}

async fn open_tutorial(
    State(tracker): State<AppState>,
    Path((module, language)): Path<(String, String)>,
    Json(req): Json<TutorialRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    Ok(Json(json!(tracker.open_tutorial(&key, req.total_sections).await?)))
}

async fn complete_section(
    State(tracker): State<AppState>,
    Path((module, language, section)): Path<(String, String, usize)>,
    Json(req): Json<TutorialRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let tutorial = tracker
        .complete_section(&key, section, req.total_sections)
        .await?;
    Ok(Json(json!(tutorial)))
}

async fn start_game(
    State(tracker): State<AppState>,
    Path((module, language)): Path<(String, String)>,
    Json(req): Json<GameRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let game = tracker
        .start_game(&key, req.difficulty, req.total_levels)
        .await?;
    Ok(Json(json!(game)))
}

async fn answer_level(
    State(tracker): State<AppState>,
    Path((module, language, level)): Path<(String, String, usize)>,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    Ok(Json(json!(tracker.answer_level(&key, level, req.correct).await?)))
}

async fn use_hint(
    State(tracker): State<AppState>,
    Path((module, language)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    Ok(Json(json!(tracker.use_hint(&key).await?)))
}

async fn enter_sandbox(
    State(tracker): State<AppState>,
    Path((module, language, difficulty)): Path<(String, String, String)>,
    Json(req): Json<SandboxRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let difficulty: Difficulty = difficulty.parse()?;
    let progress = tracker
        .enter_sandbox(&key, difficulty, req.total_exercises)
        .await?;
    Ok(Json(json!(progress)))
}

async fn retry_sandbox(
    State(tracker): State<AppState>,
    Path((module, language, difficulty)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let difficulty: Difficulty = difficulty.parse()?;
    Ok(Json(json!(tracker.retry_sandbox(&key, difficulty).await?)))
}

async fn submit_exercise(
    State(tracker): State<AppState>,
    Path((module, language, difficulty)): Path<(String, String, String)>,
    Json(req): Json<SubmissionRequest>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let difficulty: Difficulty = difficulty.parse()?;
    let submission = tracker
        .submit_exercise(&key, difficulty, req.exercise, &req.submission, &req.reference)
        .await?;
    Ok(Json(json!(submission)))
}

async fn next_difficulty(
    State(tracker): State<AppState>,
    Path((module, language, kind)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let key = ProgressKey::new(module, language)?;
    let kind: ActivityKind = kind.parse()?;
    Ok(Json(json!(tracker.next_difficulty(&key, kind).await?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasteryConfig;
    use crate::infra::progress_store::InMemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        router(Arc::new(ProgressTracker::new(store, MasteryConfig::default())))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn onboarded() -> Router {
        let app = app();
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/onboarding",
            Some(json!({"code": "WEB42", "display_name": "Mo", "age_band": "child"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        app
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_profile_without_session_requests_onboarding() {
        let (status, body) = call(&app(), Method::GET, "/api/v1/profile", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["onboarding"], true);
    }

    #[tokio::test]
    async fn test_unknown_code_is_unauthorized() {
        let (status, body) = call(
            &app(),
            Method::POST,
            "/api/v1/session",
            Some(json!({"code": "GHOST"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["onboarding"], true);
    }

    #[tokio::test]
    async fn test_duplicate_onboarding_conflicts() {
        let app = onboarded().await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/onboarding",
            Some(json!({"code": "WEB42", "display_name": "Again", "age_band": "adult"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_bad_difficulty_is_bad_request() {
        let app = onboarded().await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/progress/intro/python/sandbox/impossible",
            Some(json!({"total_exercises": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sandbox_mastery_over_http() {
        let app = onboarded().await;
        let base = "/api/v1/progress/intro/python";

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("{base}/sandbox/easy"),
            Some(json!({"total_exercises": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let answers = ["print('hi')", "x = 1", "completely unrelated text", "for i in range(3): pass"];
        let mut last = Value::Null;
        for (exercise, answer) in answers.iter().enumerate() {
            let reference = if exercise == 2 { "while True: break" } else { *answer };
            let (status, body) = call(
                &app,
                Method::POST,
                &format!("{base}/sandbox/easy/submissions"),
                Some(json!({"exercise": exercise, "submission": answer, "reference": reference})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            last = body;
        }
        assert_eq!(last["value"]["mastery"]["outcome"], "mastered");

        let (_, next) = call(&app, Method::GET, &format!("{base}/next/sandbox"), None).await;
        assert_eq!(next["value"], "medium");

        let (_, achievements) = call(&app, Method::GET, "/api/v1/achievements", None).await;
        let explorer = achievements["achievements"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["id"] == "sandbox-explorer")
            .unwrap()
            .clone();
        assert_eq!(explorer["unlocked"], true);
    }

    #[tokio::test]
    async fn test_oversized_submission_is_bad_request() {
        let app = onboarded().await;
        let base = "/api/v1/progress/intro/python/sandbox/easy";
        call(&app, Method::POST, base, Some(json!({"total_exercises": 2}))).await;

        let huge = "a".repeat(crate::DEFAULT_MAX_SUBMISSION_CHARS + 1);
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/submissions"),
            Some(json!({"exercise": 0, "submission": huge, "reference": "print(1)"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["onboarding"], false);
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let app = onboarded().await;
        let (status, _) = call(&app, Method::DELETE, "/api/v1/session", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::GET, "/api/v1/profile", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
