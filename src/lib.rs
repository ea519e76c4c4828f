pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod server;

// Re-export commonly used types for easier testing
pub use config::Config;
pub use error::GatewayError;
pub use proxy::{Proxy, ProxyHandler, ProxyTarget};
pub use server::http_server::HttpServer;
pub use server::router::GatewayRouter;
