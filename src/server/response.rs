use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{HeaderMap, Response, StatusCode};
use tracing::warn;

/// Body type flowing through the gateway in both directions. Proxied bodies
/// stream through it unbuffered; local responses wrap a `Full`.
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

pub fn full(body: impl Into<Bytes>) -> GatewayBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn header_string(mut self, name: HeaderName, value: String) -> Self {
        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(e) => warn!(header = %name, error = %e, "Dropping invalid response header"),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Response<GatewayBody> {
        let mut response = Response::new(full(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

pub struct ErrorResponse;

impl ErrorResponse {
    fn plain(status: StatusCode, body: &'static str) -> ResponseBuilder {
        ResponseBuilder::new(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Bytes::from_static(body.as_bytes()))
    }

    pub fn bad_request() -> ResponseBuilder {
        Self::plain(StatusCode::BAD_REQUEST, "400 bad request\n")
    }

    pub fn not_found() -> ResponseBuilder {
        Self::plain(StatusCode::NOT_FOUND, "404 page not found\n")
    }

    pub fn method_not_allowed() -> ResponseBuilder {
        Self::plain(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed\n")
    }

    pub fn internal_server_error() -> ResponseBuilder {
        Self::plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "500 internal server error\n",
        )
    }

    pub fn bad_gateway() -> ResponseBuilder {
        Self::plain(StatusCode::BAD_GATEWAY, "502 bad gateway\n")
    }

    pub fn service_unavailable() -> ResponseBuilder {
        Self::plain(StatusCode::SERVICE_UNAVAILABLE, "503 service unavailable\n")
            .header(RETRY_AFTER, "5")
    }

    pub fn gateway_timeout() -> ResponseBuilder {
        Self::plain(StatusCode::GATEWAY_TIMEOUT, "504 gateway timeout\n")
    }

    /// Error page for an arbitrary status; unknown codes fall back to 500.
    pub fn for_status(status: StatusCode) -> ResponseBuilder {
        match status {
            StatusCode::BAD_REQUEST => Self::bad_request(),
            StatusCode::NOT_FOUND => Self::not_found(),
            StatusCode::METHOD_NOT_ALLOWED => Self::method_not_allowed(),
            StatusCode::BAD_GATEWAY => Self::bad_gateway(),
            StatusCode::SERVICE_UNAVAILABLE => Self::service_unavailable(),
            StatusCode::GATEWAY_TIMEOUT => Self::gateway_timeout(),
            _ => Self::internal_server_error(),
        }
    }
}
