use anyhow::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lesson_flashcards::{
    api::{create_router, AppState},
    config::{Config, LoggingConfig},
    database::Database,
    flashcard_service::FlashcardService,
    generation_service::GenerationService,
    llm_providers::LLMProviderFactory,
    log_system_event,
    pdf_text::PdfExtractor,
    CompletionClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Logging first so configuration loading is visible
    let logging = LoggingConfig::from_env()?;
    let _guard = setup_logging(&logging)?;

    let config = Config::from_env()?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting lesson flashcards server");

    // Initialize database
    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let flashcard_service = FlashcardService::new(db);

    let provider = LLMProviderFactory::create_provider(&config.llm)?;
    info!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        "Initialized completion provider"
    );
    if config.llm.api_key.is_empty() {
        warn!("LLM_API_KEY is not set; generation requests will fail until it is configured");
    }

    let generation_service = GenerationService::new(
        Arc::new(provider),
        Arc::new(flashcard_service.clone()),
        Arc::new(PdfExtractor),
        &config.llm,
        config.generation.clone(),
    );

    // Create application state
    let state = AppState {
        flashcard_service,
        generation_service,
    };

    // Build the application router
    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_system_event!(shutdown, component = "server", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use std::fs;
    use tracing_subscriber::fmt;

    // RUST_LOG wins over the configured default
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Configure console output
    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    // File output with daily rotation, no ANSI colors
    let mut guard = None;
    let file_layer = if config.file_enabled {
        match fs::create_dir_all(&config.log_directory) {
            Ok(()) => {
                let file_appender =
                    tracing_appender::rolling::daily(&config.log_directory, "lesson-flashcards.log");
                let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(file_guard);
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_ansi(false)
                        .with_writer(non_blocking_file),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory '{}': {}",
                    config.log_directory, e
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if guard.is_some() {
        info!(
            "Logging initialized - writing to {}/lesson-flashcards.log with daily rotation",
            config.log_directory
        );
    }

    Ok(guard)
}
