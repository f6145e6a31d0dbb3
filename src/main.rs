//! WebSub Hub - Main Entry Point
//!
//! Starts the HTTP server hosting the hub, the subscriber callbacks and
//! the management API.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use websub_hub::api::{configure_routes, ApiState, AppState};
use websub_hub::config::Settings;
use websub_hub::metrics::{init_metrics, metrics_endpoint};
use websub_hub::services::{TaskRunner, TokioRunner};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with RUST_LOG environment variable support
    // Default: info level for websub_hub, warn for everything else
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,websub_hub=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true))
        .init();

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;

    info!("Starting WebSub Hub v{}", websub_hub::VERSION);
    info!("Hub URL: {}", settings.hub.public_url);
    info!("Callbacks: {}", settings.subscriber.callback_base_url);
    info!("Storage: {:?}", settings.database.backend);

    if settings.metrics.enabled {
        init_metrics();
    }

    let runner: Arc<dyn TaskRunner> = Arc::new(TokioRunner);
    let api_state = ApiState::from_settings(&settings, Arc::clone(&runner))
        .context("Failed to open storage")?;
    let app_state = AppState::new(settings.hub.public_url.clone());

    // Periodic maintenance; handles stay alive for the lifetime of the server
    let _cleanup_handle = api_state.hub.schedule_cleanup(
        runner.as_ref(),
        Duration::from_secs(settings.hub.cleanup_interval_sec),
    );
    let _renewal_handle = api_state.subscriber.schedule_renewal(
        runner.as_ref(),
        Duration::from_secs(settings.subscriber.sweep_interval_sec),
        settings.subscriber.renew_margin_sec,
    );
    info!(
        "Maintenance scheduled (cleanup every {}s, renewal sweep every {}s)",
        settings.hub.cleanup_interval_sec,
        settings.subscriber.sweep_interval_sec
    );

    // Start HTTP server
    let http_addr = format!("{}:{}", settings.server.host, settings.server.http_port);
    info!("Starting HTTP server on {}", http_addr);

    let metrics_enabled = settings.metrics.enabled;
    HttpServer::new(move || {
        App::new()
            // Add shared state
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(api_state.clone()))
            // Add middleware
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            // Add routes
            .configure(configure_routes)
            .configure(|cfg| {
                if metrics_enabled {
                    cfg.service(metrics_endpoint);
                }
            })
    })
    .workers(settings.server.workers)
    .bind(&http_addr)
    .with_context(|| format!("Failed to bind {}", http_addr))?
    .run()
    .await?;

    Ok(())
}
