use crate::logging::{AccessLogger, LogEntry};
use crate::metrics::MetricsCollector;
use crate::server::response::GatewayBody;
use crate::server::router::GatewayRouter;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, REFERER, USER_AGENT};
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Entry point for every request on a connection: hands the request to the
/// router and records the outcome.
pub struct RequestHandler {
    router: Arc<GatewayRouter>,
    metrics: Arc<MetricsCollector>,
    access_logger: Option<AccessLogger>,
}

impl RequestHandler {
    pub fn new(
        router: Arc<GatewayRouter>,
        metrics: Arc<MetricsCollector>,
        access_logger: Option<AccessLogger>,
    ) -> Self {
        Self {
            router,
            metrics,
            access_logger,
        }
    }

    pub fn router(&self) -> &GatewayRouter {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Result<Response<GatewayBody>, Infallible> {
        let mut req = req.map(|body| body.boxed());
        req.extensions_mut().insert(client_addr);
        Ok(self.handle(req, client_addr).await)
    }

    pub async fn handle(
        &self,
        req: Request<GatewayBody>,
        client_addr: SocketAddr,
    ) -> Response<GatewayBody> {
        let request_id = Uuid::new_v4();
        let start_time = std::time::Instant::now();

        let method = req.method().clone();
        let uri = req.uri().clone();

        let user_agent = header_string(&req, USER_AGENT);
        let referer = header_string(&req, REFERER);

        let response = self.router.dispatch(req).await;
        let duration = start_time.elapsed();

        self.metrics
            .record_request(response.status(), &method, duration);

        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %uri.path(),
            status = %response.status(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );

        if let Some(ref access_logger) = self.access_logger {
            let content_length = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            let log_entry = LogEntry {
                request_id,
                remote_addr: client_addr.ip().to_string(),
                method: method.to_string(),
                uri: uri.to_string(),
                status: response.status().as_u16(),
                response_size: content_length,
                duration_ms: duration.as_millis() as f64,
                user_agent,
                referer,
                timestamp: chrono::Utc::now(),
            };

            access_logger.log(log_entry).await;
        }

        response
    }
}

fn header_string(req: &Request<GatewayBody>, name: hyper::header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
