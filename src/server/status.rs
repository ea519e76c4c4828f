//! Built-in handlers answered without touching the upstream.

use crate::server::response::{GatewayBody, ResponseBuilder};
use crate::server::router::{Handler, HandlerFuture};
use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, StatusCode};
use serde::Serialize;

const SERVICE_NAME: &str = "adminui";

/// Liveness check. Ignores method, query and headers.
pub struct HealthHandler;

impl Handler for HealthHandler {
    fn handle(&self, _req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async {
            ResponseBuilder::new(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Bytes::from_static(b"OK"))
                .build()
        })
    }
}

/// Build metadata stamped in by the build script.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub project_name: &'static str,
    pub project_version: &'static str,
    pub binary_version: &'static str,
    pub binary_branch: &'static str,
    pub binary_build_time: &'static str,
    pub commit: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            project_name: env!("CARGO_PKG_NAME"),
            project_version: env!("CARGO_PKG_VERSION"),
            binary_version: env!("CARGO_PKG_VERSION"),
            binary_branch: env!("ADMINUI_BUILD_BRANCH"),
            binary_build_time: env!("ADMINUI_BUILD_TIME"),
            commit: env!("ADMINUI_BUILD_COMMIT"),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    code: u16,
    message: &'a str,
    data: T,
}

/// Serves the build metadata. The body is rendered once at construction.
pub struct VersionHandler {
    body: Bytes,
}

impl VersionHandler {
    pub fn new(info: BuildInfo) -> Self {
        let envelope = Envelope {
            code: StatusCode::OK.as_u16(),
            message: "OK",
            data: info,
        };
        // Serializing a struct of string fields cannot fail.
        let body = serde_json::to_vec(&envelope).unwrap_or_default();
        Self {
            body: Bytes::from(body),
        }
    }
}

impl Default for VersionHandler {
    fn default() -> Self {
        Self::new(BuildInfo::current())
    }
}

impl Handler for VersionHandler {
    fn handle(&self, _req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async move {
            ResponseBuilder::new(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(self.body.clone())
                .build()
        })
    }
}

pub struct MonitorHandler {
    body: Bytes,
}

impl MonitorHandler {
    pub fn new() -> Self {
        let body = serde_json::json!({
            "service": SERVICE_NAME,
            "status": "running",
        });
        Self {
            body: Bytes::from(body.to_string()),
        }
    }
}

impl Default for MonitorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for MonitorHandler {
    fn handle(&self, _req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async move {
            ResponseBuilder::new(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(self.body.clone())
                .build()
        })
    }
}
