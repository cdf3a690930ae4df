use anyhow::{anyhow, Result};
use chat_analytics::config::Settings;
use chat_analytics::infrastructure::init_tracing;
use chat_analytics::Application;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.logging).map_err(|e| anyhow!("Failed to initialise tracing: {e}"))?;

    info!(environment = %settings.environment, "Starting chat analytics");

    let app = Application::build(settings)?;
    app.run().await?;

    Ok(())
}
