use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::cache::GraphCache;
use crate::error::CacheError;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<GraphCache>,
}

/// Error body returned by every endpoint: `{ "message": ..., "code": ... }`.
#[derive(Debug, Serialize)]
pub struct HttpError {
    pub message: String,
    pub code: &'static str,
}

impl HttpError {
    pub fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    fn status(&self) -> StatusCode {
        match self.code {
            "SOURCE_NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(target = "http", code = self.code, message = %self.message, "request failed");
        }
        (status, Json(self)).into_response()
    }
}

impl From<CacheError> for HttpError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::SourceUnavailable(_) => HttpError::new(err.to_string(), "SOURCE_NOT_FOUND"),
            CacheError::BuildFailure(_) => HttpError::new(err.to_string(), "BUILD_FAILED"),
        }
    }
}

/// Mounts the lineage API under `prefix`. Surrounding slashes are optional;
/// "" or "/" mounts at the root.
pub fn router(cache: Arc<GraphCache>, prefix: &str) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/graph", get(graph))
        .route("/stats", get(stats))
        .route("/workspaces", get(workspaces))
        .route("/refresh", post(refresh))
        .with_state(AppState { cache });

    let prefix = prefix.trim_matches('/');
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&format!("/{prefix}"), api)
    };

    app.layer(CorsLayer::permissive())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.cache.peek();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "cached": status.cached,
        "loaded_at": status.loaded_at,
        "source_file": status.source_file,
        "last_error": status.last_error,
    }))
}

async fn graph(State(state): State<AppState>) -> Result<Response, HttpError> {
    let entry = state.cache.get(false).await?;
    Ok(Json(&entry.graph).into_response())
}

async fn stats(State(state): State<AppState>) -> Result<Response, HttpError> {
    let entry = state.cache.get(false).await?;
    Ok(Json(&entry.stats).into_response())
}

async fn workspaces(State(state): State<AppState>) -> Result<Response, HttpError> {
    let entry = state.cache.get(false).await?;
    Ok(Json(json!({ "workspaces": entry.stats.workspaces })).into_response())
}

async fn refresh(State(state): State<AppState>) -> Result<Json<serde_json::Value>, HttpError> {
    let entry = state.cache.get(true).await?;
    Ok(Json(json!({
        "status": "refreshed",
        "items": entry.graph.total_items,
        "edges": entry.graph.total_connections,
        "load_time_ms": entry.load_time_ms(),
        "row_errors": entry.row_errors,
    })))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use lineage_shared::cache::FingerprintMode;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::BuildSettings;
    use crate::locator::FixedPath;

    fn app(path: &Path, prefix: &str) -> Router {
        let cache = GraphCache::new(
            Arc::new(FixedPath(path.to_path_buf())),
            BuildSettings {
                fingerprint: FingerprintMode::Mtime,
                ..BuildSettings::default()
            },
            Duration::from_secs(300),
        );
        router(Arc::new(cache), prefix)
    }

    fn write_fixture(path: &Path) {
        fs::write(
            path,
            "Workspace Name,Item Name,Item Type,Source Type,Source Connection\n\
             Sales,Report1,Report,Sql,db://host1/sales\n\
             Finance,Ledger,Lakehouse,AdlsGen2,https://acct.dfs.core.windows.net/raw\n\
             Sales,Broken,,Sql,db://host1/sales\n",
        )
        .unwrap();
    }

    async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn graph_endpoint_serves_nodes_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_fixture(&path);

        let (status, body) = call(app(&path, "/api"), Method::GET, "/api/graph").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 6);
        assert_eq!(body["edges"].as_array().unwrap().len(), 2);
        assert_eq!(body["totalItems"], 2);
        assert_eq!(body["totalConnections"], 2);
        assert!(body["nodes"][0]["type"].is_string());
    }

    #[tokio::test]
    async fn workspaces_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_fixture(&path);

        let (status, body) = call(app(&path, "/api"), Method::GET, "/api/workspaces").await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["workspaces"]
            .as_array()
            .unwrap()
            .iter()
            .map(|w| w["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Finance", "Sales"]);
        assert_eq!(body["workspaces"][1]["item_count"], 1);
    }

    #[tokio::test]
    async fn stats_and_refresh_report_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_fixture(&path);
        let app = app(&path, "");

        let (status, stats) = call(app.clone(), Method::GET, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_nodes"], 6);
        assert_eq!(stats["items_by_type"]["Report"], 1);

        let (status, body) = call(app, Method::POST, "/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "refreshed");
        assert_eq!(body["items"], 2);
        assert_eq!(body["edges"], 2);
        assert_eq!(body["row_errors"]["malformed"], 1);
        assert!(body["load_time_ms"].is_number());
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");

        let (status, body) = call(app(&path, "/api"), Method::GET, "/api/graph").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SOURCE_NOT_FOUND");
        assert!(body["message"].as_str().unwrap().contains("absent.csv"));
    }

    #[tokio::test]
    async fn unreadable_source_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        fs::write(&path, b"Workspace Name,\xff\xfe\n").unwrap();

        let (status, body) = call(app(&path, "/api"), Method::POST, "/api/refresh").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "BUILD_FAILED");
    }

    #[tokio::test]
    async fn health_does_not_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_fixture(&path);
        let app = app(&path, "/api");

        let (status, body) = call(app.clone(), Method::GET, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cached"], false);
        assert!(body["loaded_at"].is_null());

        call(app.clone(), Method::GET, "/api/graph").await;
        let (_, body) = call(app, Method::GET, "/api/health").await;
        assert_eq!(body["cached"], true);
        assert!(body["source_file"].as_str().unwrap().ends_with("lineage.csv"));
    }

    #[tokio::test]
    async fn prefix_slashes_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_fixture(&path);

        for prefix in ["api", "/api/", "api/"] {
            let (status, body) = call(app(&path, prefix), Method::GET, "/api/health").await;
            assert_eq!(status, StatusCode::OK, "{prefix:?}");
            assert_eq!(body["status"], "healthy");
        }

        let (status, _) = call(app(&path, "/"), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}
