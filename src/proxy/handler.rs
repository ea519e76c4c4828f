use crate::proxy::Proxy;
use crate::server::response::{ErrorResponse, GatewayBody};
use crate::server::router::{Handler, HandlerFuture, MatchedPrefix};
use hyper::header::{HeaderName, HeaderValue};
use hyper::http::uri::PathAndQuery;
use hyper::{Request, Uri};
use std::sync::Arc;
use tracing::warn;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("request-id");
pub const REQUEST_ID_VALUE: HeaderValue = HeaderValue::from_static("adminui");

/// Router binding for a [`Proxy`]: strips the matched prefix and tags the
/// request so the upstream can tell it came from the admin UI.
pub struct ProxyHandler {
    proxy: Arc<Proxy>,
}

impl ProxyHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

impl Handler for ProxyHandler {
    fn handle(&self, mut req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(prefix) = req.extensions().get::<MatchedPrefix>().cloned() {
                match strip_uri_prefix(req.uri(), &prefix) {
                    Ok(uri) => *req.uri_mut() = uri,
                    Err(e) => {
                        warn!(uri = %req.uri(), error = %e, "Cannot rewrite proxied path");
                        return ErrorResponse::bad_request().build();
                    }
                }
            }

            req.headers_mut().insert(REQUEST_ID_HEADER, REQUEST_ID_VALUE);
            self.proxy.serve(req).await
        })
    }
}

fn strip_uri_prefix(uri: &Uri, prefix: &MatchedPrefix) -> Result<Uri, hyper::http::Error> {
    let path = prefix.strip(uri.path());
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.into_owned(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    Ok(Uri::from_parts(parts)?)
}
