use anyhow::{Context, Result};
use charge_proxy::api::{create_router, AppState};
use charge_proxy::config::{load_config, EntityKind, HostKind, ProxyConfig};
use charge_proxy::event::EventBus;
use charge_proxy::host::{ChargerApi, HomeAssistantClient, SimulatedHost};
use charge_proxy::registry::ProxyRegistry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charge_proxy=info".into()),
        )
        .init();

    info!("Charge proxy starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHARGE_PROXY_CONFIG").ok())
        .unwrap_or_else(|| "charge-proxy.toml".to_string());

    let mut config = load_config(&config_path)?;
    config.apply_env();

    info!(
        config = %config_path,
        host_kind = ?config.host.kind,
        host_url = %config.host.url,
        bind = %config.server.bind,
        "Configuration loaded"
    );

    let bus = EventBus::new();
    let api = build_host(&config, &bus)?;

    let registry = Arc::new(
        ProxyRegistry::attach(&config, api, &bus)
            .await
            .context("Failed to attach proxies")?,
    );
    if registry.is_empty() {
        warn!("No proxies configured");
    }

    let router = create_router(AppState {
        registry: Arc::clone(&registry),
        bus,
    })
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Proxy API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Proxy API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    registry.detach();
    info!("Charge proxy stopped");

    Ok(())
}

fn build_host(config: &ProxyConfig, bus: &EventBus) -> Result<Arc<dyn ChargerApi>> {
    match config.host.kind {
        HostKind::HomeAssistant => {
            if config.host.token.is_none() {
                warn!("No Home Assistant token configured, requests will be unauthenticated");
            }
            let client = HomeAssistantClient::new(&config.host)
                .context("Failed to create Home Assistant client")?;
            Ok(Arc::new(client))
        }
        HostKind::Simulated => {
            let host = SimulatedHost::new(bus.clone());
            // Start every simulated charger idle at its maximum current
            for entity in config.entity_specs() {
                match entity.kind {
                    EntityKind::Current => {
                        let (_, max) = entity.range();
                        host.set_state_silently(&entity.source, Some(&max.to_string()));
                    }
                    EntityKind::Switch => host.set_state_silently(&entity.source, Some("off")),
                }
            }
            info!("Using simulated host");
            Ok(Arc::new(host))
        }
    }
}
