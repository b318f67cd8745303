//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::RestExposure;
use super::host::ServerHost;
use crate::config::AppConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::storage::{EntityStore, InMemoryEntityStore};
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for the company API server
///
/// # Example
///
/// ```ignore
/// let config = AppConfig::from_yaml_file("config.yaml")?;
/// ServerBuilder::new()
///     .with_config(config)
///     .with_store(InMemoryEntityStore::new())
///     .serve("127.0.0.1:3000")
///     .await?;
/// ```
pub struct ServerBuilder {
    store: Option<Arc<dyn EntityStore>>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder with the default configuration
    pub fn new() -> Self {
        Self {
            store: None,
            config: AppConfig::default(),
            clock: Arc::new(SystemClock::new()),
            custom_routes: Vec::new(),
        }
    }

    /// Set the entity store (an in-memory store is used otherwise)
    pub fn with_store(mut self, store: impl EntityStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share an existing store
    pub fn with_shared_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source of rate-limit windows and cache validators
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add unversioned routes next to the health checks
    ///
    /// Custom routes bypass the governance chain.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the transport-agnostic host
    pub fn build_host(self) -> Result<ServerHost> {
        let (host, _) = self.into_parts()?;
        Ok(host)
    }

    /// Build the complete router (REST exposure of the host)
    pub fn build(self) -> Result<Router> {
        let (host, custom_routes) = self.into_parts()?;
        RestExposure::build_router(&host, custom_routes)
    }

    /// Build the host and its router together
    pub fn build_with_host(self) -> Result<(Arc<ServerHost>, Router)> {
        let (host, custom_routes) = self.into_parts()?;
        let router = RestExposure::build_router(&host, custom_routes)?;
        Ok((Arc::new(host), router))
    }

    fn into_parts(self) -> Result<(ServerHost, Vec<Router>)> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEntityStore::new()));
        let host = ServerHost::new(self.config, store, self.clock)?;
        Ok((host, self.custom_routes))
    }

    /// Serve until SIGTERM or Ctrl+C
    ///
    /// The sweepers of expired counters and cache validators run for the
    /// lifetime of the server and are stopped on shutdown.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let (host, app) = self.build_with_host()?;
        let sweepers: Vec<_> = [
            host.config.rate_limiting.enabled.then(|| host.spawn_counter_sweeper()),
            host.config.caching.enabled.then(|| host.spawn_cache_sweeper()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", addr);

        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        for sweeper in sweepers {
            sweeper.abort();
        }
        served?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
