use rag_chatbot::{
    build_router,
    config::AppConfig,
    db,
    gemini_client::GeminiClient,
    handlers::auth::JwtKeys,
    jobs,
    knowledge_base::KnowledgeBase,
    mailer::{HttpMailer, LogMailer, Mailer},
    middleware::rate_limit::RateLimiter,
    qdrant_client::QdrantIndex,
    rag::RagPipeline,
    vector_index::{FlatL2Index, VectorIndex},
    AppState, AUTH_RATE_LIMIT_REQUESTS, AUTH_RATE_LIMIT_WINDOW_SECS,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env()?;
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using the insecure development secret");
    }

    // Create the database connection pool
    let db_pool = db::create_pool(&config).await?;

    // Qdrant when configured, otherwise exact search in memory
    let index: Arc<dyn VectorIndex> = match &config.qdrant {
        Some(qdrant) => match QdrantIndex::new(qdrant) {
            Ok(index) => {
                tracing::info!("Using Qdrant collection '{}' at {}", qdrant.collection, qdrant.url);
                Arc::new(index)
            }
            Err(e) => {
                tracing::error!("Failed to connect to Qdrant, falling back to in-memory index: {}", e);
                Arc::new(FlatL2Index::new())
            }
        },
        None => {
            tracing::info!("QDRANT_URL not set. Using in-memory vector index.");
            Arc::new(FlatL2Index::new())
        }
    };
    let knowledge_base = Arc::new(KnowledgeBase::new(config.knowledge_base_path.clone(), index));

    // Initialize Gemini client if API key is provided
    let rag = match &config.gemini {
        Some(gemini) => {
            let client = Arc::new(GeminiClient::new(gemini));
            tracing::info!(
                "Initialized Gemini client (embeddings: {}, generation: {})",
                client.embedding_model(),
                client.generation_model()
            );
            Some(RagPipeline::new(knowledge_base.clone(), client.clone(), client))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not found. Chat answers will be unavailable.");
            None
        }
    };

    if config.knowledge_base_eager {
        if let Some(rag) = &rag {
            match rag.load_knowledge_base().await {
                Ok(Some(count)) => tracing::info!("Knowledge base ready with {} chunks", count),
                Ok(None) => tracing::warn!("Knowledge base has nothing to index yet"),
                Err(e) => tracing::error!("Failed to load knowledge base at startup: {}", e),
            }
        }
    }

    let mailer: Arc<dyn Mailer> = match &config.email {
        Some(email) => {
            tracing::info!("Sending email through {}", email.api_url);
            Arc::new(HttpMailer::new(email))
        }
        None => {
            tracing::warn!("EMAIL_API_URL not found. Welcome emails will only be logged.");
            Arc::new(LogMailer)
        }
    };

    jobs::start_cleanup_scheduler(
        db_pool.clone(),
        config.cleanup_interval,
        config.chat_retention_days,
    );

    let shared_state = Arc::new(AppState {
        db_pool,
        jwt: JwtKeys::new(&config.jwt_secret, config.access_token_ttl, config.refresh_token_ttl),
        rag,
        mailer,
        email_from: config.email_from.clone(),
        auth_rate_limiter: RateLimiter::new(AUTH_RATE_LIMIT_REQUESTS, AUTH_RATE_LIMIT_WINDOW_SECS),
    });

    let app = build_router(shared_state);

    // Run the server with ConnectInfo to provide socket addresses for rate limiting
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,rag_chatbot=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,rag_chatbot=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("RAG chatbot starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}
