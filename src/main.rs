use actix_web::{web, App, HttpServer};
use blog_edge::{configure, AppState, Args};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let address = format!("{}:{}", args.ip, args.port);

    let auth_config = web::Data::new(args.auth_config());
    info!(username = auth_config.username(), "Admin area protected by basic auth");
    if auth_config.uses_default_credentials() {
        warn!("Admin area uses the default credentials; set ADMIN_USERNAME and ADMIN_PASSWORD");
    }

    let app_state = AppState::new(args).map_err(|e| {
        error!("Failed to build upstream client: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Upstream client initialization failed")
    })?;
    let app_state = web::Data::new(app_state);

    info!("Server running at http://{}", address);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(auth_config.clone())
            .configure(configure)
    })
    .bind(&address)?
    .run()
    .await
}
