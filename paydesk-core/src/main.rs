use std::sync::Arc;

use dotenv::dotenv;
use paydesk_core::api::{router, AppState};
use paydesk_core::banking::{BankLinkProvider, HttpBankLinkClient};
use paydesk_core::notify::LogMailer;
use paydesk_core::payments::processor_from_config;
use paydesk_core::{db, Config};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting Paydesk server...");

    let config = Config::from_env()?;

    let db_pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&db_pool).await?;

    let processor = processor_from_config(&config)
        .map_err(|e| anyhow::anyhow!("{}: set PROCESSOR_BASE_URL, or PROCESSOR_SANDBOX=1 for local runs", e))?;

    let bank_link: Option<Arc<dyn BankLinkProvider>> = match &config.bank_link {
        Some(bank_link) => Some(Arc::new(HttpBankLinkClient::new(bank_link, config.external_timeout)?)),
        None => {
            info!("Bank linking disabled");
            None
        }
    };

    let app_state = AppState::new(db_pool, &config, processor, Arc::new(LogMailer), bank_link);
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.server_host, config.server_port))
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to bind to {}:{}: {}",
                config.server_host,
                config.server_port,
                e
            )
        })?;

    info!("Server listening on {}:{}", config.server_host, config.server_port);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
