//! Shared helpers for the integration tests.

use adminui_gateway::{Config, HttpServer};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Starts an upstream that answers every request with a JSON echo of what it
/// received: method, path and query, the `request-id` and `x-forwarded-for`
/// headers, and the body.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let service = hyper::service::service_fn(echo);
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let request_id = header("request-id");
    let forwarded_for = header("x-forwarded-for");
    let host = header("host");
    let request_ids = req.headers().get_all("request-id").iter().count();

    let body = req.into_body().collect().await.unwrap().to_bytes();
    let echo = serde_json::json!({
        "method": method,
        "path": path,
        "request_id": request_id,
        "request_id_count": request_ids,
        "forwarded_for": forwarded_for,
        "host": host,
        "body": String::from_utf8_lossy(&body),
    });

    let status = if path.starts_with("/missing") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-upstream", "echo")
        .body(Full::new(Bytes::from(echo.to_string())))
        .unwrap())
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Finished,
    Disconnected,
}

/// Starts an upstream that answers with a chunked body: `first` right away,
/// then one `.` per `interval`, `chunks` times. Each response reports whether
/// it ran to the end or saw its reader go away.
pub async fn start_streaming_upstream(
    chunks: usize,
    interval: Duration,
) -> (SocketAddr, mpsc::UnboundedReceiver<StreamEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let events = events_tx.clone();
            let service = hyper::service::service_fn(move |_req: Request<Incoming>| {
                let events = events.clone();
                async move {
                    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
                    tokio::spawn(async move {
                        if tx.send(Ok(Frame::data(Bytes::from_static(b"first")))).await.is_err() {
                            let _ = events.send(StreamEvent::Disconnected);
                            return;
                        }
                        for _ in 0..chunks {
                            tokio::time::sleep(interval).await;
                            if tx.send(Ok(Frame::data(Bytes::from_static(b".")))).await.is_err() {
                                let _ = events.send(StreamEvent::Disconnected);
                                return;
                            }
                        }
                        let _ = events.send(StreamEvent::Finished);
                    });

                    let frames = futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|frame| (frame, rx))
                    });
                    Ok::<_, Infallible>(Response::new(StreamBody::new(frames)))
                }
            });
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, events_rx)
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

pub async fn start_gateway(mut config: Config) -> RunningGateway {
    config.server.shutdown_timeout = 1;
    let server = HttpServer::new(Arc::new(config)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
    });

    RunningGateway {
        addr,
        shutdown: Some(tx),
        task,
    }
}

pub fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

pub async fn send(
    req: Request<Full<Bytes>>,
) -> (StatusCode, hyper::HeaderMap, Bytes) {
    let response = client().request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}

pub async fn get(url: &str) -> (StatusCode, hyper::HeaderMap, Bytes) {
    send(
        Request::get(url)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    )
    .await
}
