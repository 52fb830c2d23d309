use actix_web::{
    get,
    http::{header, Method},
    middleware::from_fn,
    route, web, HttpRequest, HttpResponse, Responder,
};
use chrono::Utc;
use clap::Parser;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

pub mod auth;
pub mod cache;
pub mod clock;
pub mod contributions;
pub mod reading_time;
pub mod storage;
pub mod views;

use auth::AuthConfig;
use cache::CalendarCache;
use contributions::{
    build_client, empty_calendar, fetch_contributions, ContributionsEnvelope, ContributionsError,
};

#[derive(Parser)]
#[clap(about, version, author)]
pub struct Args {
    #[clap(short, long, default_value = "127.0.0.1")]
    pub ip: String,

    #[clap(short, long, default_value = "3000")]
    pub port: u16,

    /// Seconds a fetched contribution calendar is served from memory
    #[clap(short, long, default_value = "600")]
    pub cache_lifetime: u16,

    /// Base URL of the upstream stats API
    #[clap(short, long, default_value = views::VIEW_API_BASE)]
    pub api_base: String,

    /// Milliseconds to wait for the upstream stats API
    #[clap(short = 't', long, default_value = "10000")]
    pub upstream_timeout_ms: u64,

    #[clap(long, env = "ADMIN_USERNAME", default_value = auth::DEFAULT_USERNAME)]
    pub admin_username: String,

    #[clap(
        long,
        env = "ADMIN_PASSWORD",
        default_value = auth::DEFAULT_PASSWORD,
        hide_env_values = true,
        hide_default_value = true
    )]
    pub admin_password: String,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("cache_lifetime", &self.cache_lifetime)
            .field("api_base", &self.api_base)
            .field("upstream_timeout_ms", &self.upstream_timeout_ms)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"[REDACTED]")
            .finish()
    }
}

impl Args {
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(&self.admin_username, &self.admin_password)
    }
}

pub struct AppState {
    pub config: Args,
    pub client: reqwest::Client,
    pub calendar: Mutex<Option<CalendarCache>>,
}

impl AppState {
    pub fn new(config: Args) -> Result<Self, ContributionsError> {
        let client = build_client(Duration::from_millis(config.upstream_timeout_ms))?;
        Ok(Self {
            config,
            client,
            calendar: Mutex::new(None),
        })
    }
}

/// Routes served by the edge. Expects `web::Data<AppState>` and
/// `web::Data<AuthConfig>` to be registered as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz).service(contributions_proxy).service(
        web::scope("/admin")
            .wrap(from_fn(auth::basic_auth_gate))
            .service(admin_images),
    );
}

#[get("/healthz")]
async fn healthz() -> &'static str {
    "ok"
}

#[get("/images")]
async fn admin_images() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(ADMIN_IMAGES_PAGE)
}

const ADMIN_IMAGES_PAGE: &str = r#"<!doctype html>
<html lang="zh-CN">
<head><meta charset="utf-8"><title>Admin Area</title></head>
<body><h1>Images</h1></body>
</html>
"#;

#[route("/api/contributions", method = "GET", method = "HEAD")]
async fn contributions_proxy(app_data: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let mut calendar_cache = app_data.calendar.lock().await;

    if let Some(cached) = calendar_cache.as_ref() {
        let cache_lifetime = app_data.config.cache_lifetime;
        if cached.is_fresh(Utc::now().timestamp(), cache_lifetime.into()) {
            return create_response(&req, &cached.body, cached.cached_at);
        }
    }

    let fetched = fetch_contributions(&app_data.client, &app_data.config.api_base).await;
    let (envelope, cacheable) = match fetched {
        Ok(calendar) => (ContributionsEnvelope::ok(calendar), true),
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch contributions");
            (
                ContributionsEnvelope::fallback(e.to_string(), empty_calendar(Utc::now())),
                false,
            )
        }
    };

    let body = match serde_json::to_string(&envelope) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize contributions");
            return HttpResponse::InternalServerError().body("Failed to build response");
        }
    };

    let current_time = Utc::now().timestamp();

    if cacheable {
        *calendar_cache = Some(CalendarCache {
            body: body.clone(),
            cached_at: current_time,
        });
    }

    create_response(&req, &body, current_time)
}

fn create_response(req: &HttpRequest, body: &str, cached_at: i64) -> HttpResponse {
    let last_modified = header::HttpDate::from(
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(cached_at.max(0) as u64),
    );

    let mut response = HttpResponse::Ok();
    response.insert_header((header::CONTENT_TYPE, "application/json"));
    response.insert_header((header::LAST_MODIFIED, last_modified.to_string()));

    if req.method() == Method::HEAD {
        response
            .insert_header((header::CONTENT_LENGTH, body.len()))
            .finish()
    } else {
        response.body(body.to_string())
    }
}
