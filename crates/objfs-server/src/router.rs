use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use objfs_core::objectlayer::StorageLayer;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.layer.storage_info().await {
        Ok(info) => (
            StatusCode::OK,
            format!("ready: {} free of {} bytes", info.free_bytes, info.total_bytes),
        ),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("disk unavailable: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use objfs_core::config::DiskConfig;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempdir().unwrap();
        let mut config = DiskConfig::default();
        config.root = dir.path().to_path_buf();
        let layer = Arc::new(objfs_core::objectlayer::FsObjectLayer::mount(config).await.unwrap());
        (
            dir,
            Arc::new(AppState {
                layer,
                start_time: std::time::Instant::now(),
            }),
        )
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (_dir, state) = state().await;
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_disk_stats() {
        let (_dir, state) = state().await;
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
