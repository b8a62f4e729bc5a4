use exam_backend::{
    config::{get_config, init_config, Config, LogFormat},
    database::{memory::MemoryStore, pool::create_pool, Store},
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Store> {
    if config.database_url.is_some() {
        let pool = create_pool(config).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Connected to Postgres, migrations applied");
        return Ok(Store::postgres(pool));
    }

    let memory = match config.memory_seed_path.as_deref() {
        Some(path) => {
            info!(path, "DATABASE_URL not set, using in-memory store seeded from file");
            MemoryStore::from_seed_file(path).await?
        }
        None => {
            info!("DATABASE_URL not set, using empty in-memory store");
            MemoryStore::new()
        }
    };
    Ok(Store::memory(memory))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format);

    let store = build_store(config).await?;
    let app_state = AppState::new(store, config);

    if config.expiry_sweep_interval_secs > 0 {
        let attempt_svc = app_state.attempt_service.clone();
        let period = Duration::from_secs(config.expiry_sweep_interval_secs);
        tokio::spawn(async move {
            loop {
                if let Err(e) = attempt_svc
                    .finalize_expired(exam_backend::utils::time::now())
                    .await
                {
                    tracing::error!("Expiry sweep error: {:?}", e);
                }
                tokio::time::sleep(period).await;
            }
        });
    }

    let app = routes::create_router(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
