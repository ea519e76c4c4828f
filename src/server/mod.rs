pub mod http_server;
pub mod request_handler;
pub mod response;
pub mod router;
pub mod static_files;
pub mod status;

pub use http_server::HttpServer;
pub use request_handler::RequestHandler;
pub use response::{ErrorResponse, GatewayBody, ResponseBuilder};
pub use router::{GatewayRouter, Handler, HandlerFuture, MatchedPrefix};
pub use static_files::StaticAssetServer;
