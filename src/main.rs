use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use owl::ai_sql::{AiContextCache, AiSqlEngine};
use owl::cli::Args;
use owl::config::Config;
use owl::connections::{
    ConnectionConfig, ConnectionRepository, DataSource, DataSourceRepository, JsonFileRepository,
};
use owl::database_clickhouse::ClickHouseClientFactory;
use owl::gateway::Gateway;
use owl::password_encryption::SecretCipher;
use owl::password_sanitizer::sanitize_connection_url;
use owl::server::{self, AppState};
use owl::{OwlResult, logging};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> OwlResult<()> {
    let mut config = Config::resolve(&args)?;
    let _log_guard = logging::init(&config.logging)?;
    debug!("Command line: {:?}", args);
    config.ensure_session_secret();

    let default_connection = config.default_connection();
    info!(
        "Default ClickHouse server: {}",
        sanitize_connection_url(&default_connection.url)
    );
    let factory = ClickHouseClientFactory::new(default_connection.clone(), config.query_timeout())?;
    let gateway = Gateway::new(Arc::new(factory), default_connection);

    let data_dir = config.data_dir();
    info!("Data directory: {}", data_dir.display());
    let cipher = SecretCipher::from_secret(config.session_secret());
    let connections: Arc<ConnectionRepository> = Arc::new(JsonFileRepository::<ConnectionConfig>::new(
        data_dir.join("connections.json"),
        cipher.clone(),
    ));
    let datasources: Arc<DataSourceRepository> = Arc::new(JsonFileRepository::<DataSource>::new(
        data_dir.join("datasources.json"),
        cipher,
    ));

    let cache_dir = config.cache_dir();
    info!("AI context cache: {}", cache_dir.display());
    let cache = AiContextCache::new(
        cache_dir,
        config.cache.max_entries,
        config.cache.max_age(),
        config.cache.sample_rows,
    );
    let ai = AiSqlEngine::new(config.ai.clone(), cache);

    let state = AppState::new(
        gateway,
        connections,
        datasources,
        ai,
        config.dashboard.clone(),
    );
    server::serve(state, &config).await
}
