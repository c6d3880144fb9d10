use financial_coach_orchestrator::{api::start_server, config::AppConfig, CoachServices};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("🚀 Financial Coach Orchestrator - API Server");
    info!("📍 Port: {}", config.port);

    if config.credential_present() {
        info!(model = %config.gemini_model, "Generative provider configured");
    } else {
        warn!("GEMINI_API_KEY not set; llm and agent capabilities are disabled");
    }

    let services = Arc::new(CoachServices::from_config(&config)?);

    info!("✅ Services initialized");
    info!("📡 Starting API server...");

    start_server(services, config.port).await?;

    Ok(())
}
