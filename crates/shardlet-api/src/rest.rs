//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shardlet_core::{ShardletError, WorkerHealth};
use shardlet_scheduler::WorkerPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub pool: Arc<WorkerPool>,
}

/// Create the API router
pub fn create_router(pool: Arc<WorkerPool>) -> Router {
    let state = Arc::new(AppState { pool });

    Router::new()
        .route("/health", get(get_health))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/:index", get(get_worker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pool readiness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub ready_workers: usize,
    pub total_workers: usize,
}

/// Worker response
#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub id: Uuid,
    pub index: u32,
    pub status: String,
    pub devices: Vec<u32>,
    pub batches_served: u64,
    pub last_error: Option<String>,
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl From<WorkerHealth> for WorkerResponse {
    fn from(health: WorkerHealth) -> Self {
        Self {
            id: health.id,
            index: health.worker_index,
            status: health.status.to_string(),
            devices: health.device_set.map(Vec::from).unwrap_or_default(),
            batches_served: health.batches_served,
            last_error: health.last_error,
            last_batch_at: health.last_batch_at,
        }
    }
}

/// Healthy while at least one worker accepts batches
async fn get_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.pool.ready_count().await;
    let total = state.pool.worker_count();

    let (code, status) = if ready > 0 {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    debug!(ready = ready, total = total, "Health checked");

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ready_workers: ready,
            total_workers: total,
        }),
    )
}

/// List all workers
async fn list_workers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkerResponse>>, (StatusCode, String)> {
    let workers = state
        .pool
        .health()
        .await
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    Ok(Json(workers))
}

/// Get a specific worker
async fn get_worker(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Result<Json<WorkerResponse>, (StatusCode, String)> {
    let health = state
        .pool
        .worker_health(index)
        .await
        .map_err(|e| match e {
            ShardletError::WorkerNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(WorkerResponse::from(health)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use shardlet_core::{
        DeviceInventory, DeviceKind, ModelArtifacts, ServingConfig, ShardletResult,
    };
    use shardlet_runtime::{
        Backend, ExecutionContext, InputBatch, LoadedModel, ModelLoader, OutputBatch, Tokenizer,
    };
    use tower::ServiceExt;

    struct ConstantBackend;

    impl Backend for ConstantBackend {
        fn forward(&self, input: &InputBatch) -> ShardletResult<OutputBatch> {
            OutputBatch::from_rows(vec![vec![1.0]; input.rows()])
        }
    }

    struct LengthTokenizer;

    impl Tokenizer for LengthTokenizer {
        fn encode(&self, text: &str) -> ShardletResult<Vec<i64>> {
            Ok(vec![text.len() as i64])
        }
    }

    struct StubLoader;

    #[async_trait]
    impl ModelLoader for StubLoader {
        async fn load(
            &self,
            _context: &ExecutionContext,
            _artifacts: &ModelArtifacts,
        ) -> ShardletResult<LoadedModel> {
            Ok(LoadedModel {
                backend: Arc::new(ConstantBackend),
                tokenizer: Arc::new(LengthTokenizer),
            })
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    /// Two workers needing two devices each, over three devices
    pub(crate) async fn pool() -> (tempfile::TempDir, Arc<WorkerPool>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"model_so_path": "model.so", "decision_rule": "passthrough"}"#,
        )
        .unwrap();

        let mut config = ServingConfig::default();
        config.pool.worker_count = 2;
        config.pool.devices_per_worker = 2;
        config.model.model_dir = dir.path().to_path_buf();

        let inventory = DeviceInventory::with_count(DeviceKind::Cuda, 3);
        let pool = WorkerPool::start(&config, &inventory, Arc::new(StubLoader))
            .await
            .unwrap();
        (dir, Arc::new(pool))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, pool) = pool().await;
        let (status, body) = get_json(create_router(pool), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready_workers"], 1);
        assert_eq!(body["total_workers"], 2);
    }

    #[tokio::test]
    async fn test_health_unavailable_after_shutdown() {
        let (_dir, pool) = pool().await;
        pool.shutdown().await;
        let (status, body) = get_json(create_router(pool), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_list_workers() {
        let (_dir, pool) = pool().await;
        let (status, body) = get_json(create_router(pool), "/api/v1/workers").await;
        assert_eq!(status, StatusCode::OK);

        let workers = body.as_array().unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0]["status"], "Ready");
        assert_eq!(workers[0]["devices"], serde_json::json!([0, 1]));
        assert_eq!(workers[1]["status"], "Failed");
        assert!(workers[1]["last_error"].is_string());
    }

    #[tokio::test]
    async fn test_get_worker() {
        let (_dir, pool) = pool().await;
        let router = create_router(pool);

        let (status, body) = get_json(router.clone(), "/api/v1/workers/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"], 0);

        let (status, _) = get_json(router, "/api/v1/workers/7").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
