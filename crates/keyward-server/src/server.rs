use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::require_admin,
    handlers::{
        create_keys, delete_key, generate_admin_secret, get_settings, health, list_keys,
        rotate_admin_secret, set_key_status, stats, update_settings, validate_key,
    },
    store::Store,
    AppState,
};

pub const DB_FILE_NAME: &str = "keyward.db";

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Admin secret to seed on first startup. Ignored once a secret exists.
    pub admin_secret: Option<String>,
    pub cors_origins: Option<String>,
    /// Mount the unauthenticated secret-regeneration route. Only enable when
    /// the listener is unreachable from untrusted networks.
    pub enable_bootstrap: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("KEYWARD_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("KEYWARD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir: std::env::var("KEYWARD_DATA_DIR").ok().map(PathBuf::from),
            admin_secret: std::env::var("KEYWARD_ADMIN_SECRET").ok(),
            cors_origins: std::env::var("KEYWARD_CORS_ORIGINS").ok(),
            enable_bootstrap: std::env::var("KEYWARD_ENABLE_BOOTSTRAP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Resolve the data directory: an explicit path (created if missing) or the
/// platform default.
pub fn resolve_data_dir(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Open the store inside `data_dir`.
pub fn open_store(data_dir: &Path) -> Result<Store> {
    let db_path = data_dir.join(DB_FILE_NAME);
    Store::open(&db_path).context("open store")
}

/// Build the application router. `enable_bootstrap` mounts
/// `POST /api/admin-secret/generate`.
pub fn router(state: AppState, enable_bootstrap: bool) -> Router {
    // Public routes (no auth required).
    let mut public = Router::new()
        .route("/health", get(health))
        .route("/api/validate", post(validate_key));
    if enable_bootstrap {
        public = public.route("/api/admin-secret/generate", post(generate_admin_secret));
    }

    // Admin routes.
    let protected = Router::new()
        .route("/api/keys", get(list_keys).post(create_keys))
        .route("/api/keys/{id}", delete(delete_key))
        .route("/api/keys/{id}/status", put(set_key_status))
        .route("/api/stats", get(stats))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/admin-secret", post(rotate_admin_secret))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let store = open_store(&data_dir)?;
    let state = AppState::new(store);

    if let Some(generated) = state.gate.bootstrap(cfg.admin_secret.as_deref())? {
        announce_generated_secret(&mut std::io::stderr().lock(), &generated)
            .context("print generated admin secret")?;
        warn!("generated initial admin secret and printed it to stderr; it will not be shown again");
    }

    if cfg.enable_bootstrap {
        warn!("unauthenticated POST /api/admin-secret/generate is enabled");
    }

    let cors = build_cors(cfg.cors_origins.as_deref());

    let app = router(state, cfg.enable_bootstrap)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "keyward server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

/// Show a freshly generated admin secret to the operator. Goes to the
/// terminal only, never into the log stream.
fn announce_generated_secret(out: &mut impl Write, secret: &str) -> std::io::Result<()> {
    writeln!(out, "initial admin secret: {secret}")?;
    writeln!(out, "record it now; it will not be shown again")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
