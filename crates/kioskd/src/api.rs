//! HTTP surface: frame submission, enrollment, reporting, settings, cameras
//! and live MJPEG relays.
//!
//! Admin routes authenticate every request with HTTP Basic credentials
//! checked against the admin store.

use crate::admin::{AdminError, AuthKind};
use crate::engine::{EngineError, EngineHandle};
use crate::pipeline::{EnrollRequest, EnrollmentError};
use crate::recorder::AttendanceError;
use crate::report::{documents_for, write_csv, Granularity, ReportRows};
use crate::settings::{format_time, parse_time, SettingsError};
use crate::state::Kiosk;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub struct AppState {
    pub kiosk: Arc<Kiosk>,
    pub engine: EngineHandle,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "success": false, "message": self.to_string() }));
        if matches!(self, Self::Unauthorized) {
            return (status, [(header::WWW_AUTHENTICATE, "Basic realm=\"kiosk\"")], body).into_response();
        }
        (status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Image(_) => Self::BadRequest(e.to_string()),
            EngineError::Enrollment(inner) => inner.into(),
            EngineError::Detector(_) | EngineError::Spawn(_) | EngineError::ChannelClosed => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::Duplicate(_) => Self::Conflict(e.to_string()),
            EnrollmentError::MissingField(_) | EnrollmentError::InvalidImage(_) | EnrollmentError::NoFace => {
                Self::BadRequest(e.to_string())
            }
            EnrollmentError::Photo(_) | EnrollmentError::Registry(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::InvalidTime(_) | SettingsError::MissingCameraField => Self::BadRequest(e.to_string()),
            SettingsError::DuplicateCamera => Self::Conflict(e.to_string()),
            SettingsError::Io(_) | SettingsError::Format(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::MissingField | AdminError::IncorrectPassword => Self::BadRequest(e.to_string()),
            AdminError::Io(_) | AdminError::Format(_) | AdminError::Hash(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<AttendanceError> for ApiError {
    fn from(e: AttendanceError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// An authenticated administrator.
pub struct AdminUser {
    pub username: String,
    pub auth_kind: AuthKind,
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let (username, password) = basic_credentials(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let auth_kind = state
            .kiosk
            .admin
            .verify(&username, &password)
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self { username, auth_kind })
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Decode a base64 image payload, with or without a `data:...;base64,` prefix.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let data = payload.split_once(',').map_or(payload, |(_, data)| data);
    STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid image: {e}")))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/login", post(login))
        .route("/api/process-frame", post(process_frame))
        .route("/api/register", post(register))
        .route("/api/employees", get(employees))
        .route("/api/attendance-today", get(attendance_today))
        .route("/api/stats", get(stats))
        .route("/api/download-csv", post(download_csv))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/change-password", post(change_password))
        .route("/api/admin-info", get(admin_info))
        .route("/api/cctv-cameras", get(list_cameras).post(add_camera))
        .route("/api/cctv-cameras/{id}", delete(remove_camera))
        .route("/api/public/cctv-cameras", get(public_cameras))
        .route("/api/cctv-stream/{id}", get(admin_stream))
        .route("/api/public/cctv-stream/{id}", get(public_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let signatures = state.engine.signature_count().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "employees": state.kiosk.registry().len(),
        "signatures": signatures,
    })))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Result<Json<Value>, ApiError> {
    match state.kiosk.admin.verify(&req.username, &req.password) {
        Some(kind) => Ok(Json(json!({ "success": true, "auth_type": kind }))),
        None => {
            tracing::warn!(username = %req.username, "failed admin login");
            Err(ApiError::Unauthorized)
        }
    }
}

#[derive(Deserialize)]
struct FrameRequest {
    frame: String,
}

async fn process_frame(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FrameRequest>,
) -> Result<Json<Value>, ApiError> {
    let frame = decode_payload(&req.frame)?;
    let faces = state.engine.process(frame, Local::now().naive_local()).await?;
    Ok(Json(json!({ "success": true, "faces": faces })))
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    emp_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    image: String,
}

async fn register(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let image = decode_payload(&req.image)?;
    let request = EnrollRequest {
        employee_id: req.emp_id,
        name: req.name,
        phone: req.phone,
        address: req.address,
    };
    let identity = state
        .engine
        .enroll(request, image, Local::now().naive_local())
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Registration successful",
        "emp_id": identity.employee_id,
        "name": identity.name,
    })))
}

async fn employees(_admin: AdminUser, State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.kiosk.registry();
    Json(json!({ "employees": registry.all(), "count": registry.len() }))
}

async fn attendance_today(_admin: AdminUser, State(state): State<Arc<AppState>>) -> Json<Value> {
    let today = Local::now().date_naive();
    let attended = state.kiosk.attended.attended(today);
    let registry = state.kiosk.registry();
    let employees: Vec<_> = registry
        .all()
        .iter()
        .filter(|i| attended.contains(&i.employee_id))
        .collect();
    Json(json!({
        "count": employees.len(),
        "employees": employees,
        "date": today.to_string(),
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let now = Local::now().naive_local();
    let total = state.kiosk.registry().len();
    let present = state.kiosk.attended.count(now.date());
    let settings = state.kiosk.settings.current();
    Json(json!({
        "total_employees": total,
        "today_attendance": present,
        "attendance_rate": attendance_rate(present, total),
        "date": now.date().to_string(),
        "within_hours": settings.within_window(now.time()),
        "operating_hours": settings.window_label(),
    }))
}

/// Percentage with one decimal; zero when nobody is enrolled.
fn attendance_rate(present: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (present as f64 / total as f64 * 1000.0).round() / 10.0
}

#[derive(Deserialize)]
struct DownloadRequest {
    #[serde(rename = "type", default = "default_granularity")]
    granularity: String,
    #[serde(default)]
    date: Option<String>,
}

fn default_granularity() -> String {
    "day".to_string()
}

async fn download_csv(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    let granularity: Granularity = req.granularity.parse().map_err(ApiError::BadRequest)?;
    let date = req
        .date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .unwrap_or_else(|| Local::now().date_naive());

    let kiosk = Arc::clone(&state.kiosk);
    let (csv, records) = tokio::task::spawn_blocking(move || {
        let documents = documents_for(kiosk.recorder.dir(), granularity, date);
        write_csv(ReportRows::new(documents, kiosk.phone_book()))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(json!({
        "success": true,
        "csv": csv,
        "filename": granularity.filename(date),
        "records": records,
    })))
}

async fn get_settings(_admin: AdminUser, State(state): State<Arc<AppState>>) -> Json<Value> {
    let settings = state.kiosk.settings.current();
    Json(json!({
        "success": true,
        "late_time": format_time(settings.late_cutoff),
        "auto_start_time": format_time(settings.auto_window_start),
        "auto_end_time": format_time(settings.auto_window_end),
    }))
}

#[derive(Deserialize)]
struct SettingsUpdate {
    late_time: Option<String>,
    auto_start_time: Option<String>,
    auto_end_time: Option<String>,
}

async fn update_settings(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettingsUpdate>,
) -> Result<Json<Value>, ApiError> {
    let parse = |v: &Option<String>| v.as_deref().map(parse_time).transpose();
    let settings = state.kiosk.settings.update_times(
        parse(&req.late_time)?,
        parse(&req.auto_start_time)?,
        parse(&req.auto_end_time)?,
    )?;
    tracing::info!(
        late_time = %format_time(settings.late_cutoff),
        window = %settings.window_label(),
        "settings updated"
    );
    Ok(Json(json!({
        "success": true,
        "message": "Settings updated",
        "settings": settings,
    })))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    #[serde(default)]
    old_password: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn change_password(
    admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .kiosk
        .admin
        .change(&admin.username, &req.old_password, &req.username, &req.password)?;
    Ok(Json(json!({ "success": true, "message": "Credentials updated" })))
}

async fn admin_info(admin: AdminUser) -> Json<Value> {
    Json(json!({
        "logged_in": true,
        "username": admin.username,
        "auth_type": admin.auth_kind,
    }))
}

async fn list_cameras(_admin: AdminUser, State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "success": true, "cameras": state.kiosk.settings.cameras() }))
}

async fn public_cameras(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "success": true, "cameras": state.kiosk.settings.cameras() }))
}

#[derive(Deserialize)]
struct CameraRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

async fn add_camera(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CameraRequest>,
) -> Result<Json<Value>, ApiError> {
    let camera = state.kiosk.settings.add_camera(&req.name, &req.url)?;
    tracing::info!(camera_id = camera.id, name = %camera.name, url = %camera.url, "camera added");
    Ok(Json(json!({ "success": true, "message": "Camera added", "camera": camera })))
}

async fn remove_camera(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.kiosk.settings.remove_camera(id)?;
    let closed = state.kiosk.streams.cancel_camera(id);
    tracing::info!(camera_id = id, removed, streams_closed = closed, "camera removal");
    Ok(Json(json!({
        "success": true,
        "message": "Camera removed",
        "removed": removed,
        "streams_closed": closed,
    })))
}

async fn admin_stream(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<Response, ApiError> {
    relay_camera(&state, id)
}

async fn public_stream(State(state): State<Arc<AppState>>, Path(id): Path<u32>) -> Result<Response, ApiError> {
    relay_camera(&state, id)
}

/// Relay a camera as a `multipart/x-mixed-replace` body.
///
/// Ingestion runs on a blocking thread feeding a bounded channel; a full
/// channel blocks the reader. A forwarding task moves parts into the body and
/// ends it as soon as the camera is removed or the viewer goes away, without
/// waiting for the blocked reader.
fn relay_camera(state: &AppState, camera_id: u32) -> Result<Response, ApiError> {
    let camera = state
        .kiosk
        .settings
        .camera(camera_id)
        .ok_or_else(|| ApiError::NotFound("Camera not found".to_string()))?;

    let guard = state.kiosk.streams.register(camera_id);
    let cancel = guard.token().clone();
    let options = state.kiosk.stream_options.clone();
    let depth = state.kiosk.stream_channel_depth;
    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(depth);
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(depth);

    tracing::info!(camera_id, url = %camera.url, kind = ?kiosk_stream::classify(&camera.url), "stream opened");

    let relay_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = relay_cancel.cancelled() => break,
                _ = body_tx.closed() => {
                    tracing::debug!(camera_id, "stream viewer disconnected");
                    relay_cancel.cancel();
                    break;
                }
                part = frame_rx.recv() => match part {
                    Some(part) => {
                        if body_tx.send(Ok(part)).await.is_err() {
                            relay_cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let mut frames = kiosk_stream::open(&camera.url, options, cancel.clone());
        for jpeg in frames.by_ref() {
            if frame_tx.blocking_send(multipart_part(&jpeg)).is_err() {
                cancel.cancel();
                break;
            }
        }
        tracing::info!(
            camera_id,
            frames = frames.frames(),
            reason = ?frames.end_reason(),
            "stream ended"
        );
    });

    Ok((
        [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response())
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 48);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
