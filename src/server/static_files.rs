use crate::server::response::{ErrorResponse, GatewayBody, ResponseBuilder};
use crate::server::router::{Handler, HandlerFuture, MatchedPrefix};
use bytes::Bytes;
use hyper::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use hyper::{Method, Request, Response, StatusCode};
use mime_guess::MimeGuess;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Serves files below `root` for whatever prefix it is registered under.
pub struct StaticAssetServer {
    root: PathBuf,
    index_files: Vec<String>,
}

impl StaticAssetServer {
    pub fn new(root: impl Into<PathBuf>, index_files: Vec<String>) -> Self {
        let root = root.into();
        let root = match root.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Web root is not accessible");
                root
            }
        };
        Self { root, index_files }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn serve(&self, req: &Request<GatewayBody>) -> Response<GatewayBody> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return ErrorResponse::method_not_allowed().build();
        }

        let request_path = match req.extensions().get::<MatchedPrefix>() {
            Some(prefix) => prefix.strip(req.uri().path()),
            None => req.uri().path().into(),
        };

        let relative = match sanitize_path(&request_path) {
            Some(relative) => relative,
            None => {
                warn!(path = %req.uri().path(), "Rejected static asset path");
                return ErrorResponse::not_found().build();
            }
        };

        let full_path = self.root.join(&relative);
        debug!("Serving static file: {}", full_path.display());

        let metadata = match fs::metadata(&full_path).await {
            Ok(meta) => meta,
            Err(_) => return ErrorResponse::not_found().build(),
        };

        let file_path = if metadata.is_dir() {
            match self.find_index_file(&full_path).await {
                Some(index_path) => index_path,
                None => return ErrorResponse::not_found().build(),
            }
        } else {
            full_path
        };

        if !self.is_under_root(&file_path) {
            warn!(path = %req.uri().path(), "Attempted path traversal");
            return ErrorResponse::not_found().build();
        }

        self.serve_single_file(req, &file_path).await
    }

    async fn serve_single_file(
        &self,
        req: &Request<GatewayBody>,
        file_path: &Path,
    ) -> Response<GatewayBody> {
        let metadata = match fs::metadata(file_path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return ErrorResponse::not_found().build(),
        };

        let etag = generate_etag(&metadata);

        if let Some(if_none_match) = req.headers().get(IF_NONE_MATCH) {
            if if_none_match.to_str().unwrap_or("") == etag {
                return ResponseBuilder::new(StatusCode::NOT_MODIFIED).build();
            }
        } else if let Some(if_modified_since) = req.headers().get(IF_MODIFIED_SINCE) {
            if let Ok(since_time) =
                httpdate::parse_http_date(if_modified_since.to_str().unwrap_or(""))
            {
                if let Ok(modified_time) = metadata.modified() {
                    // http dates carry whole seconds only
                    if httpdate::HttpDate::from(modified_time)
                        <= httpdate::HttpDate::from(since_time)
                    {
                        return ResponseBuilder::new(StatusCode::NOT_MODIFIED).build();
                    }
                }
            }
        }

        let mime_type = MimeGuess::from_path(file_path)
            .first()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let content = if req.method() == Method::HEAD {
            Bytes::new()
        } else {
            match fs::read(file_path).await {
                Ok(content) => Bytes::from(content),
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Failed to read static file");
                    return ErrorResponse::not_found().build();
                }
            }
        };

        let length = if req.method() == Method::HEAD {
            metadata.len()
        } else {
            content.len() as u64
        };

        ResponseBuilder::new(StatusCode::OK)
            .header_string(CONTENT_TYPE, mime_type.to_string())
            .header_string(CONTENT_LENGTH, length.to_string())
            .header_string(ETAG, etag)
            .header_string(LAST_MODIFIED, format_last_modified(&metadata))
            .header(ACCEPT_RANGES, "none")
            .body(content)
            .build()
    }

    fn is_under_root(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(&self.root),
            Err(_) => false,
        }
    }

    async fn find_index_file(&self, dir_path: &Path) -> Option<PathBuf> {
        for index_file in &self.index_files {
            let index_path = dir_path.join(index_file);
            if let Ok(metadata) = fs::metadata(&index_path).await {
                if metadata.is_file() {
                    return Some(index_path);
                }
            }
        }
        None
    }
}

impl Handler for StaticAssetServer {
    fn handle(&self, req: Request<GatewayBody>) -> HandlerFuture<'_> {
        Box::pin(async move { self.serve(&req).await })
    }
}

/// Turns a request path into a relative filesystem path, or `None` when it
/// would leave the root.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(path).ok()?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => relative.push(segment),
        }
    }
    Some(relative)
}

fn generate_etag(metadata: &std::fs::Metadata) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    metadata.len().hash(&mut hasher);
    if let Ok(modified) = metadata.modified() {
        if let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) {
            duration.as_nanos().hash(&mut hasher);
        }
    }
    format!("\"{:x}\"", hasher.finish())
}

fn format_last_modified(metadata: &std::fs::Metadata) -> String {
    match metadata.modified() {
        Ok(time) => httpdate::fmt_http_date(time),
        Err(_) => httpdate::fmt_http_date(std::time::SystemTime::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::response::empty;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    fn web_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app/css")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>root</html>").unwrap();
        std::fs::write(dir.path().join("app/index.html"), "<html>app</html>").unwrap();
        std::fs::write(dir.path().join("app/css/site.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("app/release..notes.txt"), "notes").unwrap();
        dir
    }

    fn server(root: &Path) -> StaticAssetServer {
        StaticAssetServer::new(root, vec!["index.html".to_string()])
    }

    fn request(method: Method, path: &str, prefix: &str) -> Request<GatewayBody> {
        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .body(empty())
            .unwrap();
        req.extensions_mut()
            .insert(MatchedPrefix(Arc::from(prefix)));
        req
    }

    async fn body_string(response: Response<GatewayBody>) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/index.html"), Some(PathBuf::from("index.html")));
        assert_eq!(
            sanitize_path("/css//style.css"),
            Some(PathBuf::from("css/style.css"))
        );
        assert_eq!(
            sanitize_path("/a/release..notes"),
            Some(PathBuf::from("a/release..notes"))
        );
        assert_eq!(sanitize_path("/"), Some(PathBuf::new()));
        assert!(sanitize_path("/../etc/passwd").is_none());
        assert!(sanitize_path("/app/%2e%2e/%2e%2e/etc/passwd").is_none());
        assert!(sanitize_path("/file\0.txt").is_none());
        assert!(sanitize_path("/file%00.txt").is_none());
        assert!(sanitize_path("/..\\secret").is_none());
    }

    #[tokio::test]
    async fn test_serves_file_under_prefix_root() {
        let root = web_root();
        let server = server(root.path());

        let response = server
            .serve(&request(Method::GET, "/app/index.html", "/"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[CONTENT_LENGTH], "16");
        assert!(response.headers().contains_key(ETAG));
        assert_eq!(body_string(response).await, "<html>app</html>");
    }

    #[tokio::test]
    async fn test_strips_registered_prefix() {
        let root = web_root();
        let server = StaticAssetServer::new(root.path().join("app"), vec!["index.html".into()]);

        let response = server
            .serve(&request(Method::GET, "/assets/css/site.css", "/assets"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/css");
        assert_eq!(body_string(response).await, "body {}");
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let root = web_root();
        let server = server(root.path());

        let response = server.serve(&request(Method::GET, "/", "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<html>root</html>");

        let response = server.serve(&request(Method::GET, "/app/", "/")).await;
        assert_eq!(body_string(response).await, "<html>app</html>");
    }

    #[tokio::test]
    async fn test_directory_without_index_is_not_found() {
        let root = web_root();
        let server = server(root.path());

        let response = server.serve(&request(Method::GET, "/app/css", "/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let root = web_root();
        let server = server(root.path());

        let response = server
            .serve(&request(Method::GET, "/app/missing.js", "/"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_outside_root_is_not_found() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
        let root = outer.path().join("www");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("index.html"), "index").unwrap();

        let server = server(&root);
        for path in [
            "/../secret.txt",
            "/app/../../secret.txt",
            "/%2e%2e/secret.txt",
            "/%2E%2E%2Fsecret.txt",
        ] {
            let response = server.serve(&request(Method::GET, path, "/")).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {}", path);
            assert!(!body_string(response).await.contains("top secret"));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_not_found() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
        let root = outer.path().join("www");
        std::fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("link.txt"))
            .unwrap();

        let server = server(&root);
        let response = server.serve(&request(Method::GET, "/link.txt", "/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let root = web_root();
        let server = server(root.path());

        let response = server
            .serve(&request(Method::HEAD, "/app/index.html", "/"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "16");
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_post_not_allowed() {
        let root = web_root();
        let server = server(root.path());

        let response = server
            .serve(&request(Method::POST, "/app/index.html", "/"))
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_conditional_requests() {
        let root = web_root();
        let server = server(root.path());

        let first = server
            .serve(&request(Method::GET, "/app/index.html", "/"))
            .await;
        let etag = first.headers()[ETAG].clone();
        let last_modified = first.headers()[LAST_MODIFIED].clone();

        let mut req = request(Method::GET, "/app/index.html", "/");
        req.headers_mut().insert(IF_NONE_MATCH, etag);
        let response = server.serve(&req).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let mut req = request(Method::GET, "/app/index.html", "/");
        req.headers_mut().insert(IF_MODIFIED_SINCE, last_modified);
        let response = server.serve(&req).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let mut req = request(Method::GET, "/app/index.html", "/");
        req.headers_mut()
            .insert(IF_NONE_MATCH, "\"stale\"".parse().unwrap());
        let response = server.serve(&req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
