use std::net::SocketAddr;

use tracing::info;

use pairchat_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pairchat=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = Config::from_env()?;

    // Init database
    let db = pairchat_db::Database::open(&config.db_path)?;

    let app = pairchat_server::app(pairchat_server::build_state(db, &config));

    let addr: SocketAddr = config.server_address().parse()?;
    info!("Pairchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
