use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_iterative_analysis::{
    analysis::AnalysisEngine,
    cli::{execute_command, Cli, Commands},
    collaborators::{fakes::offline_collaborators, Collaborators, LangbaseCollaborators},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    server::{AppState, McpServer},
    storage::{SessionStore, SqliteStorage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    // Load configuration
    let loaded = if command.is_offline() {
        Config::from_env_offline()
    } else {
        Config::from_env()
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Iterative Analysis starting..."
    );

    // Initialize storage
    let store: Arc<dyn SessionStore> = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let collaborators = if command.is_offline() {
        info!("Using scripted collaborators");
        offline_collaborators()
    } else {
        langbase_collaborators(&config).await?
    };

    if command == Commands::Serve {
        let state = Arc::new(AppState::new(config, store, collaborators));
        if let Err(e) = state.engine.recover().await {
            error!(error = %e, "Failed to recover sessions from previous run");
            return Err(e.into());
        }
        let server = McpServer::new(state);

        info!("Server ready, waiting for requests on stdin...");

        if let Err(e) = server.run().await {
            error!(error = %e, "Server error");
            return Err(e.into());
        }

        info!("Server shutdown complete");
        return Ok(());
    }

    let engine = AnalysisEngine::new(
        collaborators,
        store,
        &config.request,
        config.analysis.clone(),
    );
    let result = execute_command(command, &engine).await;
    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code);
}

/// Build Langbase-backed collaborators, creating the pipes if needed.
async fn langbase_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    info!("Ensuring required Langbase pipes exist...");
    if let Err(e) = langbase.ensure_analysis_pipes(&config.pipes).await {
        error!(error = %e, "Failed to ensure analysis pipes exist");
        return Err(e.into());
    }

    Ok(Collaborators::uniform(Arc::new(LangbaseCollaborators::new(
        langbase,
        config.pipes.clone(),
    ))))
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
