//! Companion bridge binary: loads `.env`/environment settings, wires up
//! structured logging, and serves the OpenAI-compatible adapter.

use std::sync::Arc;

use config::Settings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let settings = Arc::new(Settings::from_env());
    init_logging(&settings.log_format);

    tracing::info!(
        port = settings.adapter_port,
        model = %settings.model_name,
        tool_mode = %settings.tool_mode,
        "starting companion bridge"
    );

    serve::run_serve(settings).await
}
