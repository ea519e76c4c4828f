//! Longest-prefix request routing.
//!
//! The table is filled once at startup and then shared read-only between all
//! connection tasks, so dispatch never takes a lock.

use crate::error::{GatewayError, Result};
use crate::server::response::{ErrorResponse, GatewayBody};
use futures::future::BoxFuture;
use hyper::{Request, Response};
use std::sync::Arc;
use tracing::{debug, trace};

pub type HandlerFuture<'a> = BoxFuture<'a, Response<GatewayBody>>;

/// A request handler bound to a route prefix. Failures are turned into error
/// responses by the handler itself, so dispatch always yields a response.
pub trait Handler: Send + Sync {
    fn handle(&self, req: Request<GatewayBody>) -> HandlerFuture<'_>;
}

/// The prefix a request was routed by, stored in the request extensions so
/// handlers can strip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPrefix(pub Arc<str>);

impl MatchedPrefix {
    /// Removes the prefix from `path`, always leaving a path that starts with '/'.
    pub fn strip<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        let rest = path.strip_prefix(&*self.0).unwrap_or(path);
        if rest.starts_with('/') {
            rest.into()
        } else {
            format!("/{}", rest).into()
        }
    }
}

struct RouteEntry {
    prefix: Arc<str>,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
pub struct GatewayRouter {
    routes: Vec<RouteEntry>,
}

impl GatewayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `prefix`. Registering the same prefix again replaces
    /// the earlier handler.
    pub fn register_route(
        &mut self,
        prefix: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(GatewayError::EmptyRoutePrefix);
        }

        match self.routes.iter_mut().find(|e| *e.prefix == *prefix) {
            Some(entry) => {
                debug!(prefix = %prefix, "Replacing route handler");
                entry.handler = handler;
            }
            None => {
                debug!(prefix = %prefix, "Registering route");
                self.routes.push(RouteEntry {
                    prefix: prefix.into(),
                    handler,
                });
            }
        }
        Ok(())
    }

    /// The longest registered prefix of `path`, if any.
    pub fn find_route(&self, path: &str) -> Option<(&Arc<str>, &Arc<dyn Handler>)> {
        self.routes
            .iter()
            .filter(|entry| path.starts_with(&*entry.prefix))
            .max_by_key(|entry| entry.prefix.len())
            .map(|entry| (&entry.prefix, &entry.handler))
    }

    pub async fn dispatch(&self, mut req: Request<GatewayBody>) -> Response<GatewayBody> {
        let (prefix, handler) = match self.find_route(req.uri().path()) {
            Some(route) => route,
            None => {
                debug!(path = %req.uri().path(), "No route matched");
                return ErrorResponse::not_found().build();
            }
        };

        trace!(path = %req.uri().path(), prefix = %prefix, "Route matched");
        req.extensions_mut().insert(MatchedPrefix(prefix.clone()));
        handler.handle(req).await
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|entry| &*entry.prefix)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
