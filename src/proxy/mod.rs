mod handler;

pub use handler::{ProxyHandler, REQUEST_ID_HEADER, REQUEST_ID_VALUE};

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::MetricsCollector;
use crate::server::response::{ErrorResponse, GatewayBody};
use http_body_util::BodyExt;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::{Authority, Scheme};
use hyper::{Request, Response, Uri, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Validated upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
}

impl ProxyTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|e: http::uri::InvalidUri| GatewayError::invalid_upstream(url, e.to_string()))?;

        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| GatewayError::invalid_upstream(url, "missing scheme"))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(GatewayError::invalid_upstream(
                url,
                format!("unsupported scheme {}", scheme),
            ));
        }

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| GatewayError::invalid_upstream(url, "missing host"))?;
        if authority.host().is_empty() {
            return Err(GatewayError::invalid_upstream(url, "missing host"));
        }

        if uri.query().is_some() {
            return Err(GatewayError::invalid_upstream(
                url,
                "query strings are not allowed in the base url",
            ));
        }

        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            scheme,
            authority,
            base_path,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// Points `uri` at the upstream, keeping its path (joined under the base
    /// path) and query.
    pub fn rewrite(&self, uri: &Uri) -> Result<Uri> {
        let path = uri.path();
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_path, path)
        } else {
            format!("{}/{}", self.base_path, path)
        };
        let path_and_query = match uri.query() {
            Some(query) => format!("{}?{}", joined, query),
            None => joined,
        };

        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;
        Ok(uri)
    }
}

impl std::fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    pub connect_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub pool_idle_timeout: Option<Duration>,
}

impl From<&UpstreamConfig> for ProxyOptions {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            response_timeout: config.response_timeout(),
            pool_idle_timeout: (config.pool_idle_timeout > 0)
                .then(|| Duration::from_secs(config.pool_idle_timeout)),
        }
    }
}

/// Forwards requests to a single upstream, streaming both bodies.
pub struct Proxy {
    target: ProxyTarget,
    client: Client<HttpsConnector<HttpConnector>, GatewayBody>,
    response_timeout: Option<Duration>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(target_base_url: &str) -> Result<Self> {
        Self::with_options(target_base_url, ProxyOptions::default())
    }

    pub fn with_options(target_base_url: &str, options: ProxyOptions) -> Result<Self> {
        let target = ProxyTarget::parse(target_base_url)?;

        let mut http = HttpConnector::new();
        http.set_connect_timeout(options.connect_timeout);
        http.set_nodelay(true);
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());
        if let Some(idle) = options.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build(connector);

        Ok(Self {
            target,
            client,
            response_timeout: options.response_timeout,
            metrics: None,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::with_options(&config.host, ProxyOptions::from(config))
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// Forwards the request once. Upstream failures come back as errors; the
    /// response body streams straight from the upstream connection.
    pub async fn forward(&self, req: Request<GatewayBody>) -> Result<Response<GatewayBody>> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.target.rewrite(&parts.uri)?;
        parts.version = Version::HTTP_11;
        remove_hop_by_hop_headers(&mut parts.headers);
        parts.headers.remove(header::HOST);

        if let Some(client_addr) = parts.extensions.get::<SocketAddr>().copied() {
            append_forwarded_for(&mut parts.headers, client_addr);
        }

        debug!(method = %parts.method, uri = %parts.uri, "Forwarding request upstream");

        let response_future = self.client.request(Request::from_parts(parts, body));
        let response = match self.response_timeout {
            Some(limit) => timeout(limit, response_future)
                .await
                .map_err(|_| GatewayError::UpstreamTimeout(limit))?,
            None => response_future.await,
        }
        .map_err(GatewayError::Upstream)?;

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop_headers(&mut parts.headers);

        let body = body
            .map_err(|e| {
                warn!(error = %e, "Upstream response body aborted");
                e
            })
            .boxed();

        Ok(Response::from_parts(parts, body))
    }

    /// Forwards the request and turns any failure into an error response.
    pub async fn serve(&self, req: Request<GatewayBody>) -> Response<GatewayBody> {
        if let Some(ref metrics) = self.metrics {
            metrics.record_proxied();
        }

        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                error!(upstream = %self.target, error = %e, "Proxy request failed");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_upstream_failure();
                }
                ErrorResponse::for_status(e.status_code()).build()
            }
        }
    }
}

const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Strips headers that only apply to a single connection, including any the
/// Connection header lists.
fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS.iter() {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

fn append_forwarded_for(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let client_ip = client_addr.ip().to_string();
    let value = match headers
        .get(HeaderName::from_static("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::try_from(value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}
