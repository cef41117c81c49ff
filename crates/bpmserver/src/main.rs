use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use bpmruntime::{BpmRuntime, ProcessLoader, RuntimeConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod broker;
mod routes;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<BpmRuntime>,
}

impl AppState {
    pub fn new(runtime: Arc<BpmRuntime>) -> Self {
        Self { runtime }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting BPM Engine Server");

    let registry = bpmsteps::standard_registry()?;
    let runtime = Arc::new(BpmRuntime::with_registry(registry, RuntimeConfig::from_env()));

    if let Ok(dir) = std::env::var("BPM_PROCESS_DIR") {
        let loaded = ProcessLoader::new(&dir)
            .load_into(runtime.configs().as_ref())
            .await?;
        info!("📂 Loaded {} process definitions from {}", loaded, dir);
    }

    runtime.start()?;
    info!("✅ Runtime started with {} step types", runtime.registry().len());

    let shutdown = CancellationToken::new();
    let listener = broker::config_from_env()
        .map(|config| broker::spawn_listener(config, runtime.clone(), shutdown.clone()));
    if listener.is_none() {
        info!("BPM_BROKER_URL not set, broker listener disabled");
    }

    let app_state = web::Data::new(AppState::new(runtime.clone()));
    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    shutdown.cancel();
    if let Some(listener) = listener {
        if let Err(e) = listener.await {
            warn!("Broker listener ended abnormally: {}", e);
        }
    }
    runtime.shutdown().await;

    Ok(())
}
