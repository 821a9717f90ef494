use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use meli_resolver::meli::MeliClient;
use meli_resolver::server::{self, AppState};
use meli_resolver::token::AppTokenCache;
use meli_resolver::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/resolver.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        pool,
        api: Arc::new(MeliClient::from_config(&cfg)),
        app_tokens: AppTokenCache::new(),
        default_site: cfg.marketplace.default_site.clone(),
        limits: cfg.limits.clone(),
    });

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr).await?;
    info!(addr = %cfg.app.bind_addr, "starting product-resolver server");
    axum::serve(listener, app).await?;

    Ok(())
}
