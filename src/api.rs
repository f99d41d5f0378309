use crate::config::Config;
use crate::error::Error;
use crate::model::{
    AttendanceStatus, AttendanceType, QueryStatus, Role, User,
};
use crate::{announcements, attendance, auth, db, notify, queries, rooms, users};
use anyhow::Result;
use axum::{
    extract::{Path, Query as UrlQuery, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<SqliteConnectionManager>,
    pub config: Config,
    pub notifier: Arc<dyn notify::Notifier>,
    pub jwt_secret: Vec<u8>,
    pub login_limiter: auth::LoginRateLimiter,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let manager = SqliteConnectionManager::file(config.data_dir.join("hostel.db"));
        let pool = Pool::new(manager)?;
        let conn = pool.get()?;
        db::migrate(&conn)?;
        let jwt_secret = db::ensure_jwt_secret(&conn)?;
        if let Some(boot) = &config.bootstrap {
            if users::count_users(&conn)? == 0 {
                let hash = auth::hash_password(&boot.password)?;
                users::create_user(
                    &conn,
                    &boot.name,
                    &boot.email,
                    Role::Admin,
                    &hash,
                    None,
                    None,
                )?;
                tracing::info!(email = %boot.email, "bootstrapped admin account");
            }
        }
        let notifier: Arc<dyn notify::Notifier> = match &config.smtp {
            Some(smtp) => Arc::new(notify::SmtpNotifier::new(smtp)?),
            None => Arc::new(notify::LogNotifier),
        };
        Ok(Self {
            pool,
            config,
            notifier,
            jwt_secret,
            login_limiter: auth::LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
        })
    }

    /// Swap the outbound channel; test suites inject a recording sink here.
    pub fn with_notifier(mut self, notifier: Arc<dyn notify::Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let identity = Router::new()
        .route("/api/me", get(me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/login", post(login))
        .route("/api/users", post(create_user))
        .route("/api/students", get(list_students))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/student/:id", get(student_room))
        .route("/api/queries", get(list_queries).post(create_query))
        .route("/api/queries/:id", get(get_query))
        .route("/api/queries/:id/replies", post(add_reply))
        .route("/api/queries/:id/status", patch(set_query_status))
        .route("/api/attendance", get(list_attendance).post(create_attendance))
        .route("/api/attendance/:id", patch(decide_attendance))
        .route("/api/attendance/student/:id", get(student_attendance))
        .route(
            "/api/announcements",
            get(list_announcements).post(create_announcement),
        )
        .merge(identity)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ErrorResp {
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Notification(_) | Error::Internal(_) | Error::Store(_) | Error::Pool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResp {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: axum::http::Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if let Ok(claims) = auth::verify_jwt(&state.jwt_secret, token) {
                    req.extensions_mut().insert(claims);
                    return Ok(next.run(req).await);
                }
            }
        }
    }
    Err(StatusCode::UNAUTHORIZED)
}

fn parse_id(raw: &str, entity: &'static str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::NotFound(entity))
}

#[derive(Deserialize)]
struct StatusFilter {
    status: Option<String>,
}

// ---- users & identity ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReq {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: User,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<impl IntoResponse, Error> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(Error::Validation("missing_credentials"));
    }
    if !state.login_limiter.check(&req.email).await {
        return Err(Error::RateLimited);
    }
    let conn = state.pool.get()?;
    let (user, hash) = users::find_by_email(&conn, &req.email)?.ok_or(Error::Unauthorized)?;
    if !auth::verify_password(&req.password, &hash) {
        return Err(Error::Unauthorized);
    }
    let token = auth::issue_jwt(&state.jwt_secret, &user.id.to_string(), Duration::hours(24))
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Json(LoginResp { token, user }))
}

async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    let id = Uuid::parse_str(&claims.sub).map_err(|_| Error::Unauthorized)?;
    let user = users::find_user(&conn, &id)?.ok_or(Error::Unauthorized)?;
    Ok(Json(user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserReq {
    name: String,
    email: String,
    role: String,
    password: String,
    profile_image: Option<String>,
    room_id: Option<Uuid>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserReq>,
) -> Result<impl IntoResponse, Error> {
    let role: Role = req.role.parse()?;
    if req.password.is_empty() {
        return Err(Error::Validation("empty_password"));
    }
    let hash = auth::hash_password(&req.password).map_err(|e| Error::Internal(e.to_string()))?;
    let conn = state.pool.get()?;
    let user = users::create_user(
        &conn,
        &req.name,
        &req.email,
        role,
        &hash,
        req.profile_image.as_deref(),
        req.room_id.as_ref(),
    )?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_students(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    Ok(Json(users::list_students(&conn)?))
}

// ---- rooms ----

#[derive(Deserialize)]
struct CreateRoomReq {
    number: String,
    capacity: i64,
    block: String,
    floor: i64,
}

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomReq>,
) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    let room = rooms::create_room(&conn, &req.number, req.capacity, &req.block, req.floor)?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_rooms(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    Ok(Json(rooms::list_rooms(&conn)?))
}

async fn student_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "user")?;
    let conn = state.pool.get()?;
    // "no room" is a valid answer, not an error
    Ok(Json(rooms::room_for_student(&conn, &id)?))
}

// ---- queries ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueryReq {
    student_id: Uuid,
    student_name: String,
    subject: String,
    description: String,
}

async fn create_query(
    State(state): State<AppState>,
    Json(req): Json<CreateQueryReq>,
) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    let query = queries::create_query(
        &conn,
        &req.student_id,
        &req.student_name,
        &req.subject,
        &req.description,
    )?;
    Ok((StatusCode::CREATED, Json(query)))
}

async fn list_queries(
    State(state): State<AppState>,
    UrlQuery(filter): UrlQuery<StatusFilter>,
) -> Result<impl IntoResponse, Error> {
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<QueryStatus>)
        .transpose()?;
    let conn = state.pool.get()?;
    Ok(Json(queries::list_queries(&conn, status)?))
}

async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "query")?;
    let conn = state.pool.get()?;
    Ok(Json(queries::get_query(&conn, &id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyReq {
    user_id: Uuid,
    user_name: String,
    user_role: String,
    message: String,
}

async fn add_reply(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReplyReq>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "query")?;
    let role: Role = req.user_role.parse()?;
    let conn = state.pool.get()?;
    let query = queries::add_reply(&conn, &id, &req.user_id, &req.user_name, role, &req.message)?;
    Ok(Json(query))
}

#[derive(Deserialize)]
struct StatusReq {
    status: String,
}

async fn set_query_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusReq>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "query")?;
    let status: QueryStatus = req.status.parse()?;
    let conn = state.pool.get()?;
    Ok(Json(queries::set_status(&conn, &id, status)?))
}

// ---- attendance ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAttendanceReq {
    student_id: Uuid,
    student_name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(with = "time::serde::rfc3339")]
    start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    end_date: OffsetDateTime,
    reason: String,
}

async fn create_attendance(
    State(state): State<AppState>,
    Json(req): Json<CreateAttendanceReq>,
) -> Result<impl IntoResponse, Error> {
    let kind: AttendanceType = req.kind.parse()?;
    let conn = state.pool.get()?;
    let record = attendance::create_request(
        &conn,
        &req.student_id,
        &req.student_name,
        kind,
        req.start_date,
        req.end_date,
        &req.reason,
    )?;
    // best effort: the request is already persisted
    match users::find_warden(&conn) {
        Ok(Some(warden)) => {
            let (subject, body) = notify::request_created_mail(
                &record.student_name,
                record.kind,
                record.start_date,
                record.end_date,
                &record.reason,
            );
            notify::spawn_send(state.notifier.clone(), warden.email, subject, body);
        }
        Ok(None) => tracing::warn!("no warden on file, skipping request notification"),
        Err(e) => tracing::warn!(error = %e, "warden lookup failed, skipping notification"),
    }
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_attendance(
    State(state): State<AppState>,
    UrlQuery(filter): UrlQuery<StatusFilter>,
) -> Result<impl IntoResponse, Error> {
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<AttendanceStatus>)
        .transpose()?;
    let conn = state.pool.get()?;
    Ok(Json(attendance::list_requests(&conn, status)?))
}

async fn student_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "user")?;
    let conn = state.pool.get()?;
    Ok(Json(attendance::list_by_student(&conn, &id)?))
}

async fn decide_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusReq>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&id, "attendance")?;
    let decision: AttendanceStatus = req.status.parse()?;
    let conn = state.pool.get()?;
    let record = attendance::decide(&conn, &id, decision)?;
    if record.status == AttendanceStatus::Approved {
        match users::find_user(&conn, &record.student_id) {
            Ok(Some(student)) => {
                let (subject, body) = notify::request_approved_mail(
                    record.kind,
                    record.start_date,
                    record.end_date,
                );
                notify::spawn_send(state.notifier.clone(), student.email, subject, body);
            }
            Ok(None) => {
                tracing::warn!(student_id = %record.student_id, "student account missing, skipping approval notification")
            }
            Err(e) => tracing::warn!(error = %e, "student lookup failed, skipping notification"),
        }
    }
    Ok(Json(record))
}

// ---- announcements ----

#[derive(Deserialize)]
struct AnnouncementFilter {
    important: Option<bool>,
    q: Option<String>,
}

async fn list_announcements(
    State(state): State<AppState>,
    UrlQuery(filter): UrlQuery<AnnouncementFilter>,
) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    Ok(Json(announcements::list_announcements(
        &conn,
        filter.important.unwrap_or(false),
        filter.q.as_deref(),
    )?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAnnouncementReq {
    title: String,
    content: String,
    created_by: String,
    #[serde(default)]
    important: bool,
}

async fn create_announcement(
    State(state): State<AppState>,
    Json(req): Json<CreateAnnouncementReq>,
) -> Result<impl IntoResponse, Error> {
    let conn = state.pool.get()?;
    let record = announcements::create_announcement(
        &conn,
        &req.title,
        &req.content,
        &req.created_by,
        req.important,
    )?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Run the HTTP server with the provided configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config)?;
    let addr: SocketAddr = state.config.bind.parse()?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
