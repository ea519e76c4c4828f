//! Error types shared by the proxy and the router.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The upstream base URL could not be turned into a proxy target.
    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("route prefix must not be empty")]
    EmptyRoutePrefix,

    #[error("failed to build forwarding uri: {0}")]
    InvalidForwardUri(#[from] http::Error),

    /// Connecting to the upstream failed or it closed the connection before
    /// sending a response head.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("failed to configure upstream tls: {0}")]
    Tls(#[from] rustls::Error),
}

impl GatewayError {
    pub fn invalid_upstream(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUpstream {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Status code reported to the client when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidForwardUri(_) => StatusCode::BAD_REQUEST,
            Self::InvalidUpstream { .. } | Self::EmptyRoutePrefix | Self::Tls(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
