use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Multipart, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db;
use crate::error::TriageError;
use crate::models::{AuditRecord, ClassificationRequest, Condition, ContactMessage, Features, Session};
use crate::pipeline::{Outcome, Pipeline};

pub const SUBJECT_HEADER: &str = "x-subject-id";

pub type AppState = Arc<Pipeline>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!("Bad request: {message}");
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl From<TriageError> for ApiError {
    fn from(err: TriageError) -> Self {
        let status = match &err {
            err if err.is_input_error() => StatusCode::BAD_REQUEST,
            TriageError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("request failed: {err}");
        } else {
            tracing::warn!("request rejected: {err}");
        }

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "message": self.message })),
        )
            .into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = parts
            .headers
            .get(SUBJECT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        Ok(match subject {
            Some(username) => Session {
                username: username.to_string(),
                role: "user".to_string(),
            },
            None => Session::guest(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    status: &'static str,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk: Option<f64>,
    confidence: f64,
    severity: String,
    severity_tier: String,
    urgency: String,
    specialist: &'static str,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage_risk: Option<&'static str>,
    summary: String,
    saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record_id: Option<i64>,
}

impl From<Outcome> for PredictionResponse {
    fn from(outcome: Outcome) -> Self {
        let condition = outcome.result.condition;
        let risk = matches!(condition, Condition::Diabetes | Condition::Heart)
            .then_some(outcome.result.raw_probability * 100.0);
        let saved = outcome.saved();

        Self {
            status: "ok",
            label: outcome.result.label,
            risk,
            confidence: outcome.result.confidence_percent,
            severity: outcome.result.severity_label,
            severity_tier: outcome.result.severity_tier.to_string(),
            urgency: outcome.advice.urgency.to_string(),
            specialist: outcome.advice.specialist,
            action: outcome.advice.action,
            stage: outcome.result.stage.map(|stage| stage.stage),
            stage_risk: outcome.result.stage.map(|stage| stage.risk),
            summary: outcome.summary,
            saved,
            record_id: outcome.record_id,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/xray", post(xray))
        .route("/api/diabetes", post(diabetes))
        .route("/api/heart", post(heart))
        .route("/api/cancer", post(cancer))
        .route("/api/history", get(history))
        .route("/api/contact", post(contact))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Clinical triage service is running."
}

async fn xray(
    State(pipeline): State<AppState>,
    session: Session,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    pipeline.models().get(Condition::Xray)?;

    let mut multipart = multipart.map_err(|_| ApiError::bad_request("No file uploaded"))?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.body_text()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(err.body_text()))?;
            upload = Some(bytes.to_vec());
            break;
        }
    }

    let bytes = upload
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("No file uploaded"))?;

    let outcome = pipeline
        .run(ClassificationRequest {
            subject_id: session.username,
            condition: Condition::Xray,
            features: Features::Image(bytes),
        })
        .await?;

    Ok(Json(outcome.into()))
}

async fn diabetes(
    State(pipeline): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ApiError> {
    classify_tabular(&pipeline, session, Condition::Diabetes, &body).await
}

async fn heart(
    State(pipeline): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ApiError> {
    classify_tabular(&pipeline, session, Condition::Heart, &body).await
}

async fn cancer(
    State(pipeline): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ApiError> {
    classify_tabular(&pipeline, session, Condition::Cancer, &body).await
}

/// An unreadable body is treated as an empty object so the first required
/// field is reported as missing.
async fn classify_tabular(
    pipeline: &Pipeline,
    session: Session,
    condition: Condition,
    body: &[u8],
) -> Result<Json<PredictionResponse>, ApiError> {
    pipeline.models().get(condition)?;

    let fields = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default();
    let features = Features::from_json(condition, &fields)?;

    let outcome = pipeline
        .run(ClassificationRequest {
            subject_id: session.username,
            condition,
            features,
        })
        .await?;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    subject: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    status: &'static str,
    subject: String,
    records: Vec<AuditRecord>,
}

async fn history(
    State(pipeline): State<AppState>,
    session: Session,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let limit = query.limit.unwrap_or(50);
    if limit <= 0 {
        return Err(ApiError::bad_request("limit must be positive"));
    }

    let subject = query.subject.unwrap_or(session.username);
    let records = db::fetch(pipeline.pool(), Some(&subject), limit).await?;

    Ok(Json(HistoryResponse {
        status: "ok",
        subject,
        records,
    }))
}

async fn contact(
    State(pipeline): State<AppState>,
    payload: Result<Json<ContactMessage>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(message) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let id = db::save_message(pipeline.pool(), &message).await?;
    Ok(Json(json!({ "status": "ok", "id": id })))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn register(
    State(pipeline): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(credentials) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let session = db::create_user(
        pipeline.pool(),
        &credentials.username,
        &credentials.password,
        "user",
    )
    .await?;
    Ok(Json(json!({ "status": "ok", "username": session.username, "role": session.role })))
}

async fn login(
    State(pipeline): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(credentials) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    match db::verify_user(pipeline.pool(), &credentials.username, &credentials.password).await? {
        Some(session) => Ok(Json(
            json!({ "status": "ok", "username": session.username, "role": session.role }),
        )),
        None => Err(ApiError::unauthorized("Invalid credentials")),
    }
}
