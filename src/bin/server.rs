use tracing_subscriber::EnvFilter;

use pulseboard::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        port = config.port,
        upstream = %config.upstream_tcp_address,
        "starting pulseboard"
    );

    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}
