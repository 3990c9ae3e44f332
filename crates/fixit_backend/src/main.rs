use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use log::{debug, info, warn};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{Passwords, TokenKeys},
    config::{Config, UploadConfig},
    db::{memory::InMemoryStore, surreal::SurrealStore, IssueStore, UserStore},
    images::{CloudinaryStore, DisabledImageStore, ImageStore},
    notify::Dispatcher,
    services::{Deps, Services},
};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod images;
mod middleware;
mod models;
mod notify;
mod pagination;
mod response;
mod services;
#[cfg(test)]
mod testing;
mod validation;

/// Slack on top of the image cap for the text parts of a multipart body
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    services: Services,
    upload: Arc<UploadConfig>,
}

impl AppState {
    pub async fn init(config: &Config, in_memory: bool) -> anyhow::Result<AppState> {
        let (issues, users): (Arc<dyn IssueStore>, Arc<dyn UserStore>) = if in_memory {
            warn!("Using the in-memory store, nothing will be persisted");
            let store = InMemoryStore::new();
            (Arc::new(store.clone()), Arc::new(store))
        } else {
            let db_conn = db::surreal::connect(&config.db).await?;
            db::surreal::migrate(&db_conn).await?;
            let store = SurrealStore::new(db_conn, config.db.timeout);
            (Arc::new(store.clone()), Arc::new(store))
        };

        let images: Arc<dyn ImageStore> = match &config.cloudinary {
            Some(cloudinary) => Arc::new(CloudinaryStore::new(cloudinary, config.http_timeout)?),
            None => {
                info!("Image uploads disabled, Cloudinary credentials not set");
                Arc::new(DisabledImageStore)
            },
        };

        let services = Services::new(Deps {
            issues,
            users,
            notifier: Arc::new(Dispatcher::from_config(config)?),
            images,
            passwords: Passwords::new(config.auth.scrypt_log_n)?,
            tokens: Arc::new(TokenKeys::new(&config.auth)),
            pagination: config.pagination,
        });

        Ok(AppState {
            services,
            upload: Arc::new(config.upload.clone()),
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "fixit")]
#[command(bin_name = "fixit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Flag to disable HTTPS
    #[arg(long)]
    no_https: bool,

    /// Port to listen on
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Keep everything in process memory instead of SurrealDB
    #[arg(long)]
    memory: bool,

    /// Create the default admin account if no admin exists yet
    #[arg(long)]
    seed_admin: bool,
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_headers([header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]);

    if origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin {o}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(cors.allow_origin(origins).allow_credentials(true))
}

fn app(state: AppState, config: &Config) -> anyhow::Result<Router> {
    Ok(Router::new()
        .nest("/api", api::router(&state))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.upload.max_bytes + MULTIPART_OVERHEAD))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp(None).init();

    let cli = Cli::parse();

    match dotenvy::dotenv() {
        Ok(path) => {
            debug!("Loaded env vars from {}", path.display());
            for (key, _) in dotenvy::dotenv_iter()?.flatten() {
                debug!("{key} set");
            }
        },
        Err(_) => warn!("Error reading .env file"),
    }

    let config = Config::from_env()?;
    let app_state = AppState::init(&config, cli.memory).await?;

    if cli.seed_admin {
        app_state
            .services
            .auth
            .seed_admin(&config.seed_admin)
            .await
            .context("Failed to seed admin account")?;
    }

    let app = app(app_state, &config)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    if cli.no_https {
        info!("Starting server on {addr} with HTTPS disabled...");

        axum_server::bind(addr)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!("Starting server on {addr} with HTTPS...");

        let rustls_config = RustlsConfig::from_pem_file(&config.tls.cert, &config.tls.key)
            .await
            .with_context(|| format!("Failed to load TLS cert {}", config.tls.cert.display()))?;

        axum_server::bind_rustls(addr, rustls_config)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}
