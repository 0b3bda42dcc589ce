use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use session_locals::{ServerConfig, ProviderKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = ServerConfig::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let provider = match &cfg.provider {
        ProviderKind::Local => "local".to_string(),
        ProviderKind::Http { url } => format!("http({})", url),
    };
    info!(
        target: "session_locals",
        "session-locals starting: RUST_LOG='{}', http_port={}, provider={}, session_ttl_secs={}, users_file={:?}, database={:?}",
        rust_log, cfg.http_port, provider, cfg.session_ttl.as_secs(), cfg.users_file, cfg.database_url
    );

    session_locals::server::run(cfg).await
}
