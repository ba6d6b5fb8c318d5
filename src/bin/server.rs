//! scopeperm REST API Server
//!
//! Run with: cargo run --features server --bin scopeperm-server -- --db-path ./data --seed users.json
//!
//! Endpoints:
//!   GET  /health             - Health check
//!   POST /login              - Password login, returns bearer token
//!   POST /logout             - End the current session
//!   GET  /session            - Who the token evaluates as
//!   POST /check              - Single permission check
//!   POST /check/batch        - Independent checks, plus any/all summaries
//!   POST /check/field        - Field-level edit decision
//!   GET  /audit?limit=N      - Recent checks, most recent last
//!   GET  /metrics            - Cache counters
//!   POST /cache/invalidate   - Drop cached results for one permission
//!   POST /cache/clear        - Drop all cached results
//!   POST /cache/prefetch     - Warm the cache

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scopeperm::{
    authenticate, AuditRecord, CacheMetrics, FieldAccess, PermError, PermissionCheck, PermissionContext, Permissions,
    PermissionsConfig, SessionContext, SessionRegistry, UserStore,
};

// ============================================================================
// Config
// ============================================================================

struct ServerConfig {
    db_path: String,
    port: u16,
    seed: Option<String>,
    session_ttl: Option<u64>,
}

impl ServerConfig {
    fn from_args() -> Option<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let cfg = Self::parse(&args, |k| std::env::var(k).ok());
        if cfg.is_none() {
            print_help();
        }
        cfg
    }

    /// `None` when help was requested.
    fn parse(args: &[String], env: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let mut cfg = ServerConfig {
            db_path: env("SCOPEPERM_DB").unwrap_or_else(|| "./data/scopeperm.mdb".into()),
            port: env("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000),
            seed: None,
            session_ttl: None,
        };
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--db-path" | "-d" => {
                    if let Some(v) = value { cfg.db_path = v; i += 1; }
                }
                "--port" | "-p" => {
                    if let Some(v) = value { cfg.port = v.parse().unwrap_or(cfg.port); i += 1; }
                }
                "--seed" | "-s" => {
                    if value.is_some() { cfg.seed = value; i += 1; }
                }
                "--session-ttl" => {
                    if let Some(v) = value { cfg.session_ttl = v.parse().ok(); i += 1; }
                }
                "--help" | "-h" => return None,
                _ => {}
            }
            i += 1;
        }
        Some(cfg)
    }
}

fn print_help() {
    println!("scopeperm-server - scoped permission checks over HTTP\n");
    println!("USAGE:");
    println!("    scopeperm-server [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    -d, --db-path <PATH>      User directory (default: $SCOPEPERM_DB or ./data/scopeperm.mdb)");
    println!("    -p, --port <PORT>         Listen on PORT (default: $PORT or 3000)");
    println!("    -s, --seed <FILE>         Load users from a JSON seed file");
    println!("        --session-ttl <SECS>  Expire sessions after SECS (default: never)");
    println!("    -h, --help                Show this help message");
}

// ============================================================================
// State
// ============================================================================

struct AppState {
    store: UserStore,
    sessions: Mutex<SessionRegistry>,
    config: PermissionsConfig,
}

impl AppState {
    fn sessions(&self) -> MutexGuard<'_, SessionRegistry> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` against the caller's session.
    fn with_session<T>(
        &self,
        headers: &HeaderMap,
        f: impl FnOnce(&mut Permissions) -> T,
    ) -> Result<T, PermError> {
        let token = bearer(headers).ok_or(PermError::InvalidToken)?;
        let mut sessions = self.sessions();
        let perms = sessions.get_mut(token)?;
        Ok(f(perms))
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct LoginReq {
    user_id: String,
    password: String,
}

#[derive(Serialize)]
struct LoginRes {
    token: String,
}

#[derive(Deserialize)]
struct CheckReq {
    permission: String,
    #[serde(default)]
    context: Option<PermissionContext>,
}

#[derive(Serialize)]
struct CheckRes {
    permission: String,
    allowed: bool,
}

#[derive(Deserialize)]
struct BatchReq {
    checks: Vec<PermissionCheck>,
}

#[derive(Serialize)]
struct BatchRes {
    results: std::collections::BTreeMap<String, bool>,
    any: bool,
    all: bool,
}

#[derive(Deserialize)]
struct FieldReq {
    field: String,
    resource: String,
    #[serde(default)]
    context: Option<PermissionContext>,
}

#[derive(Serialize)]
struct FieldRes {
    access: FieldAccess,
    editable: bool,
    disabled: bool,
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct InvalidateReq {
    permission: String,
}

#[derive(Serialize)]
struct InvalidateRes {
    removed: usize,
}

#[derive(Serialize)]
struct HealthRes {
    status: String,
    version: String,
    sessions: usize,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_for(e: &PermError) -> StatusCode {
    match e {
        PermError::InvalidToken | PermError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        PermError::NotFound(_) => StatusCode::NOT_FOUND,
        PermError::InvalidPermission(_) | PermError::InvalidUserId(_) | PermError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        PermError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T>(r: Result<T, PermError>) -> ApiResult<T> {
    match r {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => (status_for(&e), Json(ApiResponse::err(e.to_string()))),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions().len(),
    })
}

async fn post_login(State(state): State<Arc<AppState>>, Json(req): Json<LoginReq>) -> ApiResult<LoginRes> {
    // LMDB read and hashing stay off the runtime and outside the registry lock
    let lookup = state.clone();
    let checked = tokio::task::spawn_blocking(move || authenticate(&lookup.store, &req.user_id, &req.password))
        .await
        .unwrap_or_else(|e| Err(PermError::Store(e.to_string())));
    let r = checked
        .and_then(|user| state.sessions().open(user, state.config.clone()))
        .map(|token| LoginRes { token });
    respond(r)
}

async fn post_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<bool> {
    let r = bearer(&headers)
        .ok_or(PermError::InvalidToken)
        .map(|t| state.sessions().logout(t));
    respond(r)
}

async fn get_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Option<SessionContext>> {
    respond(state.with_session(&headers, |p| p.permission_context()))
}

async fn post_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CheckReq>,
) -> ApiResult<CheckRes> {
    respond(state.with_session(&headers, |p| CheckRes {
        allowed: p.has_permission(&req.permission, req.context.as_ref()),
        permission: req.permission.clone(),
    }))
}

async fn post_check_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchReq>,
) -> ApiResult<BatchRes> {
    respond(state.with_session(&headers, |p| {
        let results = p.check_multiple_permissions(&req.checks);
        BatchRes {
            any: results.values().any(|&r| r),
            all: results.values().all(|&r| r),
            results,
        }
    }))
}

async fn post_check_field(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FieldReq>,
) -> ApiResult<FieldRes> {
    respond(state.with_session(&headers, |p| {
        let access = p.field_access(&req.field, &req.resource, req.context.as_ref());
        FieldRes { access, editable: access.is_editable(), disabled: !access.is_editable() }
    }))
}

async fn get_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Vec<AuditRecord>> {
    respond(state.with_session(&headers, |p| p.get_audit_log(q.limit)))
}

async fn get_metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<CacheMetrics> {
    respond(state.with_session(&headers, |p| p.get_performance_metrics()))
}

async fn post_invalidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InvalidateReq>,
) -> ApiResult<InvalidateRes> {
    respond(state.with_session(&headers, |p| InvalidateRes {
        removed: p.invalidate_permission(&req.permission),
    }))
}

async fn post_clear(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<CacheMetrics> {
    respond(state.with_session(&headers, |p| {
        p.clear_permission_cache();
        p.get_performance_metrics()
    }))
}

async fn post_prefetch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchReq>,
) -> ApiResult<CacheMetrics> {
    respond(state.with_session(&headers, |p| {
        p.prefetch_permissions(&req.checks);
        p.get_performance_metrics()
    }))
}

// ============================================================================
// Main
// ============================================================================

fn bind(port: u16) -> std::io::Result<tokio::net::TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    tokio::net::TcpListener::from_std(socket.into())
}

fn fail(msg: &str, e: impl std::fmt::Display) -> ! {
    error!(error = %e, "{}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match ServerConfig::from_args() {
        Some(c) => c,
        None => return,
    };
    let config = PermissionsConfig::from_env().unwrap_or_else(|e| fail("bad configuration", e));

    let store = UserStore::open(&cfg.db_path).unwrap_or_else(|e| fail("failed to open user directory", e));
    if let Some(path) = &cfg.seed {
        let json = std::fs::read_to_string(path).unwrap_or_else(|e| fail("failed to read seed file", e));
        store.seed_json(&json).unwrap_or_else(|e| fail("failed to seed user directory", e));
    }

    let state = Arc::new(AppState {
        store,
        sessions: Mutex::new(SessionRegistry::new(cfg.session_ttl)),
        config,
    });

    if cfg.session_ttl.is_some() {
        let purge = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let n = purge.sessions().purge_expired();
                if n > 0 {
                    info!(purged = n, "expired sessions removed");
                }
            }
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/login", post(post_login))
        .route("/logout", post(post_logout))
        .route("/session", get(get_session))
        .route("/check", post(post_check))
        .route("/check/batch", post(post_check_batch))
        .route("/check/field", post(post_check_field))
        .route("/audit", get(get_audit))
        .route("/metrics", get(get_metrics))
        .route("/cache/invalidate", post(post_invalidate))
        .route("/cache/clear", post(post_clear))
        .route("/cache/prefetch", post(post_prefetch))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = bind(cfg.port).unwrap_or_else(|e| fail("failed to bind", e));
    info!(port = cfg.port, db = %cfg.db_path, "scopeperm-server v{} listening", env!("CARGO_PKG_VERSION"));
    if let Err(e) = axum::serve(listener, app).await {
        fail("server error", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use scopeperm::{set_password, UserProfile};
    use tempfile::TempDir;

    fn auth(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    fn setup() -> (TempDir, Arc<AppState>) {
        let dir = TempDir::new().unwrap();
        let store = UserStore::open(dir.path()).unwrap();
        store.put_user("alice", &UserProfile::default()).unwrap();
        store.grant("alice", "property:read").unwrap();
        set_password(&store, "alice", "pw").unwrap();
        let state = Arc::new(AppState {
            store,
            sessions: Mutex::new(SessionRegistry::new(None)),
            config: PermissionsConfig::default(),
        });
        (dir, state)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ========================================================================
    // Bearer tokens
    // ========================================================================

    #[test]
    fn bearer_token_extracted() {
        assert_eq!(bearer(&auth("Bearer abc")), Some("abc"));
        assert_eq!(bearer(&auth("Bearer  abc ")), Some("abc"));
    }

    #[test]
    fn missing_header_has_no_token() {
        assert_eq!(bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn other_scheme_has_no_token() {
        assert_eq!(bearer(&auth("Basic YWxpY2U6cHc=")), None);
        assert_eq!(bearer(&auth("abc")), None);
    }

    // ========================================================================
    // Error mapping
    // ========================================================================

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(status_for(&PermError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&PermError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&PermError::NotFound("user x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&PermError::InvalidPermission("a".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&PermError::InvalidUserId("".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&PermError::Config("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&PermError::Store("disk".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_shapes() {
        let (status, Json(body)) = respond(Ok(7u8));
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.data, Some(7));
        assert_eq!(body.error, None);

        let (status, Json(body)) = respond::<u8>(Err(PermError::InvalidToken));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!body.success);
        assert_eq!(body.data, None);
        assert_eq!(body.error.as_deref(), Some("invalid token"));
    }

    // ========================================================================
    // Sessions over HTTP
    // ========================================================================

    #[test]
    fn with_session_requires_live_token() {
        let (_dir, state) = setup();
        let token = state
            .sessions()
            .open(scopeperm::CurrentUser::new("svc").with_permissions(["unit:read"]), PermissionsConfig::default())
            .unwrap();

        let ok = state.with_session(&auth(&format!("Bearer {}", token)), |p| p.has_permission("unit:read", None));
        assert_eq!(ok, Ok(true));
        assert_eq!(state.with_session(&HeaderMap::new(), |_| ()), Err(PermError::InvalidToken));
        assert_eq!(state.with_session(&auth("Bearer nope"), |_| ()), Err(PermError::InvalidToken));
        assert_eq!(state.with_session(&auth(&format!("Basic {}", token)), |_| ()), Err(PermError::InvalidToken));
    }

    #[tokio::test]
    async fn login_then_check() {
        let (_dir, state) = setup();
        let req = LoginReq { user_id: "alice".into(), password: "pw".into() };
        let (status, Json(body)) = post_login(State(state.clone()), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        let token = body.data.unwrap().token;

        let check = CheckReq { permission: "property:read".into(), context: None };
        let (status, Json(body)) =
            post_check(State(state.clone()), auth(&format!("Bearer {}", token)), Json(check)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.data.unwrap().allowed);

        let check = CheckReq { permission: "property:read".into(), context: None };
        let (status, _) = post_check(State(state), HeaderMap::new(), Json(check)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_login_is_unauthorized() {
        let (_dir, state) = setup();
        let req = LoginReq { user_id: "alice".into(), password: "wrong".into() };
        let (status, Json(body)) = post_login(State(state.clone()), Json(req)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.data.is_none());
        assert!(state.sessions().is_empty());
    }

    // ========================================================================
    // Arguments
    // ========================================================================

    #[test]
    fn args_override_env() {
        let env = |k: &str| match k {
            "SCOPEPERM_DB" => Some("/env/db".to_string()),
            "PORT" => Some("4000".to_string()),
            _ => None,
        };
        let cfg = ServerConfig::parse(&[], env).unwrap();
        assert_eq!((cfg.db_path.as_str(), cfg.port), ("/env/db", 4000));

        let cfg = ServerConfig::parse(
            &args(&["-d", "/tmp/x", "--port", "8080", "--seed", "users.json", "--session-ttl", "60"]),
            env,
        )
        .unwrap();
        assert_eq!(cfg.db_path, "/tmp/x");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.seed.as_deref(), Some("users.json"));
        assert_eq!(cfg.session_ttl, Some(60));
    }

    #[test]
    fn args_defaults_and_junk() {
        let cfg = ServerConfig::parse(&args(&["--port", "nope", "--session-ttl", "-1", "--bogus"]), |_| None).unwrap();
        assert_eq!(cfg.db_path, "./data/scopeperm.mdb");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.session_ttl, None);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn help_stops_parsing() {
        assert!(ServerConfig::parse(&args(&["--help"]), |_| None).is_none());
        assert!(ServerConfig::parse(&args(&["-p", "1", "-h"]), |_| None).is_none());
    }
}
