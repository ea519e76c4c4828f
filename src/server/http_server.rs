use crate::config::Config;
use crate::logging::AccessLogger;
use crate::metrics::{MetricsCollector, MetricsHandler};
use crate::proxy::{Proxy, ProxyHandler};
use crate::server::request_handler::RequestHandler;
use crate::server::router::GatewayRouter;
use crate::server::static_files::StaticAssetServer;
use crate::server::status::{HealthHandler, MonitorHandler, VersionHandler};
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub struct HttpServer {
    config: Arc<Config>,
    handler: Arc<RequestHandler>,
}

impl HttpServer {
    /// Builds the proxy and the route table. An invalid upstream fails here,
    /// before any socket is bound.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        let router = build_router(&config, metrics.clone())?;
        let access_logger = AccessLogger::from_config(&config.log)?;

        let handler = Arc::new(RequestHandler::new(
            Arc::new(router),
            metrics,
            access_logger,
        ));

        Ok(Self { config, handler })
    }

    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Binds the configured address and serves until a termination signal.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_address()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Listening on {}", addr);

        self.serve(listener, wait_for_signal()).await
    }

    /// Accepts connections from `listener` until `shutdown` resolves, then
    /// drains open connections for up to `server.shutdown_timeout` seconds.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
            };

            if let Err(e) = stream.set_nodelay(self.config.server.tcp_nodelay) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let handler = self.handler.clone();
            let service = hyper::service::service_fn(move |req| {
                let handler = handler.clone();
                async move { handler.handle_request(req, addr).await }
            });
            let connection = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service);
            let connection = graceful.watch(connection);
            let metrics = self.handler.metrics().clone();

            tokio::spawn(async move {
                metrics.increment_active_connections();
                if let Err(e) = connection.await {
                    debug!("Connection error from {}: {}", addr, e);
                }
                metrics.decrement_active_connections();
            });
        }

        drop(listener);
        let drain = Duration::from_secs(self.config.server.shutdown_timeout);
        tokio::select! {
            _ = graceful.shutdown() => info!("All connections closed"),
            _ = tokio::time::sleep(drain) => {
                warn!("Timed out after {:?} waiting for connections to close", drain);
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Registers the static server, built-in handlers and the proxy against
/// their configured prefixes.
pub fn build_router(config: &Config, metrics: Arc<MetricsCollector>) -> Result<GatewayRouter> {
    let routes = &config.routes;

    let proxy = Proxy::from_config(&config.webconfigadmin)
        .context("Failed to create upstream proxy")?
        .with_metrics(metrics.clone());
    info!(
        upstream = %proxy.target(),
        prefix = %routes.proxy,
        "Proxying to upstream"
    );

    let mut router = GatewayRouter::new();
    router.register_route(
        routes.static_files.as_str(),
        Arc::new(StaticAssetServer::new(
            &config.server.web_root,
            config.server.index_files.clone(),
        )),
    )?;
    router.register_route(routes.healthz.as_str(), Arc::new(HealthHandler))?;
    router.register_route(routes.version.as_str(), Arc::new(VersionHandler::default()))?;
    router.register_route(routes.monitor.as_str(), Arc::new(MonitorHandler::new()))?;
    router.register_route(
        routes.proxy.as_str(),
        Arc::new(ProxyHandler::new(Arc::new(proxy))),
    )?;
    if let Some(ref prefix) = routes.metrics {
        router.register_route(prefix.as_str(), Arc::new(MetricsHandler::new(metrics)))?;
    }

    Ok(router)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
        use signal_hook_tokio::Signals;

        match Signals::new([SIGTERM, SIGINT, SIGQUIT]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal {}, initiating graceful shutdown", signal);
                }
                return;
            }
            Err(e) => error!("Failed to register signal handlers: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        futures::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, initiating graceful shutdown");
}
