//! Worker pool: device binding, model load and per-worker batch loops

use chrono::Utc;
use futures::future::join_all;
use shardlet_core::{
    DeviceInventory, ModelArtifacts, Request, Response, ServingConfig, ShardletError,
    ShardletResult, WorkerHealth, WorkerStatus,
};
use shardlet_runtime::{BatchHandler, ExecutionContext, ModelLoader, ModelRunner};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::allocator::DeviceAllocator;

type BatchReply = oneshot::Sender<ShardletResult<Vec<Response>>>;
type Job = (Vec<Request>, BatchReply);

/// Batches that may wait for a busy worker
const WORKER_QUEUE_DEPTH: usize = 16;

/// One worker as seen by the pool
struct WorkerSlot {
    health: Arc<RwLock<WorkerHealth>>,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Pool of workers, each bound to a disjoint device set
pub struct WorkerPool {
    workers: Vec<WorkerSlot>,
}

impl WorkerPool {
    /// Start every worker.
    ///
    /// Workers start concurrently. A worker whose allocation, binding or
    /// model load fails ends up `Failed` without affecting the others;
    /// only invalid pool-wide settings fail the call.
    pub async fn start(
        config: &ServingConfig,
        inventory: &DeviceInventory,
        loader: Arc<dyn ModelLoader>,
    ) -> ShardletResult<Self> {
        config.validate()?;

        let allocator = DeviceAllocator::from_config(&config.pool, inventory);

        info!(
            workers = config.pool.worker_count,
            devices_per_worker = config.pool.devices_per_worker,
            available = inventory.available_indices().len(),
            loader = loader.name(),
            "Starting worker pool"
        );

        let starts = (0..config.pool.worker_count).map(|worker_index| {
            start_worker(worker_index, &allocator, inventory, config, loader.as_ref())
        });
        let workers = join_all(starts).await;

        let pool = Self { workers };
        info!(
            ready = pool.ready_count().await,
            total = pool.workers.len(),
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Number of workers in the pool, including failed ones
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submit a batch to one worker and wait for its responses
    pub async fn submit(
        &self,
        worker_index: u32,
        batch: Vec<Request>,
    ) -> ShardletResult<Vec<Response>> {
        let slot = self.slot(worker_index)?;

        let status = slot.health.read().await.status;
        if !status.accepts_batches() {
            return Err(ShardletError::WorkerUnavailable(format!(
                "worker {} is {}",
                worker_index, status
            )));
        }

        let sender = slot.sender.read().await.clone().ok_or_else(|| {
            ShardletError::WorkerUnavailable(format!("worker {} is stopped", worker_index))
        })?;

        let (reply, response) = oneshot::channel();
        sender.send((batch, reply)).await.map_err(|_| {
            ShardletError::WorkerUnavailable(format!("worker {} is stopped", worker_index))
        })?;

        response.await.map_err(|_| {
            ShardletError::Internal(format!("worker {} dropped the batch", worker_index))
        })?
    }

    /// Health of every worker, ordered by index
    pub async fn health(&self) -> Vec<WorkerHealth> {
        let mut health = Vec::with_capacity(self.workers.len());
        for slot in &self.workers {
            health.push(slot.health.read().await.clone());
        }
        health
    }

    /// Health of one worker
    pub async fn worker_health(&self, worker_index: u32) -> ShardletResult<WorkerHealth> {
        Ok(self.slot(worker_index)?.health.read().await.clone())
    }

    /// Number of workers currently accepting batches
    pub async fn ready_count(&self) -> usize {
        let mut count = 0;
        for slot in &self.workers {
            if slot.health.read().await.status.accepts_batches() {
                count += 1;
            }
        }
        count
    }

    /// Stop every worker after its current batch and wait for it to exit
    pub async fn shutdown(&self) {
        info!("Shutting down worker pool");

        for slot in &self.workers {
            // Dropping the sender ends the worker loop once its queue drains
            slot.sender.write().await.take();
        }

        for slot in &self.workers {
            let task = slot.task.lock().await.take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "Worker task ended abnormally");
                }
            }
        }
    }

    fn slot(&self, worker_index: u32) -> ShardletResult<&WorkerSlot> {
        self.workers
            .get(worker_index as usize)
            .ok_or_else(|| ShardletError::WorkerNotFound(worker_index.to_string()))
    }
}

async fn start_worker(
    worker_index: u32,
    allocator: &DeviceAllocator,
    inventory: &DeviceInventory,
    config: &ServingConfig,
    loader: &dyn ModelLoader,
) -> WorkerSlot {
    let health = Arc::new(RwLock::new(WorkerHealth::starting(worker_index)));

    match boot_worker(worker_index, allocator, inventory, config, loader, &health).await {
        Ok(handler) => {
            transition(&health, WorkerStatus::Ready).await;
            let (sender, receiver) = mpsc::channel(WORKER_QUEUE_DEPTH);
            let task = tokio::spawn(run_worker(
                worker_index,
                handler,
                receiver,
                Arc::clone(&health),
            ));
            info!(worker_index = worker_index, "Worker ready");
            WorkerSlot {
                health,
                sender: RwLock::new(Some(sender)),
                task: Mutex::new(Some(task)),
            }
        }
        Err(e) => {
            error!(
                worker_index = worker_index,
                error = %e,
                "Worker failed to start"
            );
            {
                let mut h = health.write().await;
                h.last_error = Some(e.to_string());
            }
            transition(&health, WorkerStatus::Failed).await;
            WorkerSlot {
                health,
                sender: RwLock::new(None),
                task: Mutex::new(None),
            }
        }
    }
}

/// Allocate, bind, then load; binding always precedes the model load
async fn boot_worker(
    worker_index: u32,
    allocator: &DeviceAllocator,
    inventory: &DeviceInventory,
    config: &ServingConfig,
    loader: &dyn ModelLoader,
    health: &RwLock<WorkerHealth>,
) -> ShardletResult<BatchHandler> {
    let spec = allocator.assign(worker_index)?;
    health.write().await.device_set = Some(spec.device_set.clone());

    let context = ExecutionContext::bind(&spec, inventory)?;
    let artifacts = ModelArtifacts::load(&config.model.model_dir)?;

    debug!(
        worker_index = worker_index,
        model_so_path = %artifacts.config.model_so_path.display(),
        "Loading model"
    );
    let model = loader.load(&context, &artifacts).await?;
    let runner = ModelRunner::select(&context, model.backend);

    Ok(BatchHandler::new(
        worker_index,
        runner,
        model.tokenizer,
        &artifacts,
        &config.batching,
    ))
}

async fn run_worker(
    worker_index: u32,
    mut handler: BatchHandler,
    mut receiver: mpsc::Receiver<Job>,
    health: Arc<RwLock<WorkerHealth>>,
) {
    while let Some((batch, reply)) = receiver.recv().await {
        let size = batch.len();
        let result = match handler.handle(batch).await {
            Ok(outcome) => {
                let next = if outcome.fatal.is_some() {
                    WorkerStatus::Degraded
                } else {
                    WorkerStatus::Serving
                };
                {
                    let mut h = health.write().await;
                    h.batches_served += 1;
                    h.last_batch_at = Some(Utc::now());
                    if let Some(e) = &outcome.fatal {
                        h.last_error = Some(e.to_string());
                    }
                }
                transition(&health, next).await;
                debug!(worker_index = worker_index, size = size, "Batch handled");
                Ok(outcome.responses)
            }
            Err(e) => {
                warn!(worker_index = worker_index, error = %e, "Batch rejected");
                Err(e)
            }
        };

        if reply.send(result).is_err() {
            debug!(worker_index = worker_index, "Batch submitter went away");
        }
    }

    transition(&health, WorkerStatus::Stopped).await;
    info!(worker_index = worker_index, "Worker stopped");
}

async fn transition(health: &RwLock<WorkerHealth>, next: WorkerStatus) {
    let mut h = health.write().await;
    if h.status.can_transition_to(next) {
        h.status = next;
    } else {
        warn!(
            worker_index = h.worker_index,
            from = %h.status,
            to = %next,
            "Ignoring invalid worker status transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shardlet_core::{DeviceKind, DeviceSet, ErrorCategory};
    use shardlet_runtime::{Backend, InputBatch, LoadedModel, OutputBatch, Tokenizer};
    use std::sync::Mutex as StdMutex;

    struct DigitTokenizer;

    impl Tokenizer for DigitTokenizer {
        fn encode(&self, text: &str) -> ShardletResult<Vec<i64>> {
            text.split_whitespace()
                .map(|w| {
                    w.parse::<i64>()
                        .map_err(|_| ShardletError::Decode(format!("bad token {}", w)))
                })
                .collect()
        }
    }

    /// Two classes chosen by the parity of the first token; 99 crashes
    struct ParityBackend;

    impl Backend for ParityBackend {
        fn forward(&self, input: &InputBatch) -> ShardletResult<OutputBatch> {
            let mut rows = Vec::new();
            for i in 0..input.rows() {
                let first = input.row(i).unwrap()[0];
                if first == 99 {
                    return Err(ShardletError::ModelExecution("device fault".to_string()));
                }
                rows.push(if first % 2 == 0 {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                });
            }
            OutputBatch::from_rows(rows)
        }
    }

    #[derive(Default)]
    struct RecordingLoader {
        fail_worker: Option<u32>,
        loaded: StdMutex<Vec<(u32, DeviceSet)>>,
    }

    #[async_trait]
    impl ModelLoader for RecordingLoader {
        async fn load(
            &self,
            context: &ExecutionContext,
            _artifacts: &ModelArtifacts,
        ) -> ShardletResult<LoadedModel> {
            if self.fail_worker == Some(context.worker_index) {
                return Err(ShardletError::ModelLoad("artifact corrupt".to_string()));
            }
            self.loaded
                .lock()
                .unwrap()
                .push((context.worker_index, context.devices.clone()));
            Ok(LoadedModel {
                backend: Arc::new(ParityBackend),
                tokenizer: Arc::new(DigitTokenizer),
            })
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn model_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"model_so_path": "model.so", "max_length": 4}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("index_to_name.json"),
            r#"{"0": "even", "1": "odd"}"#,
        )
        .unwrap();
        dir
    }

    fn config(dir: &tempfile::TempDir, workers: u32, per_worker: u32) -> ServingConfig {
        let mut config = ServingConfig::default();
        config.pool.worker_count = workers;
        config.pool.devices_per_worker = per_worker;
        config.model.model_dir = dir.path().to_path_buf();
        config
    }

    fn cuda(count: u32) -> DeviceInventory {
        DeviceInventory::with_count(DeviceKind::Cuda, count)
    }

    fn text(id: &str, payload: &str) -> Request {
        Request::new(id).with_data(payload, "string")
    }

    #[tokio::test]
    async fn test_start_assigns_disjoint_devices() {
        let dir = model_dir();
        let loader = Arc::new(RecordingLoader::default());
        let pool = WorkerPool::start(&config(&dir, 2, 4), &cuda(8), loader.clone())
            .await
            .unwrap();

        let health = pool.health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| h.status == WorkerStatus::Ready));
        assert_eq!(health[0].device_set.as_ref().unwrap().ids(), &[0, 1, 2, 3]);
        assert_eq!(health[1].device_set.as_ref().unwrap().ids(), &[4, 5, 6, 7]);

        let mut loaded = loader.loaded.lock().unwrap().clone();
        loaded.sort_by_key(|(index, _)| *index);
        assert_eq!(loaded[1].1.ids(), &[4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_submit_serves_batch() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 2, 1),
            &cuda(2),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        let responses = pool
            .submit(1, vec![text("a", "3"), Request::new("b"), text("c", "4")])
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].body, shardlet_core::ResponseBody::Text("odd".to_string()));
        assert_eq!(responses[1].category, Some(ErrorCategory::EmptyPayload));
        assert_eq!(responses[2].body, shardlet_core::ResponseBody::Text("even".to_string()));

        let health = pool.worker_health(1).await.unwrap();
        assert_eq!(health.status, WorkerStatus::Serving);
        assert_eq!(health.batches_served, 1);
        assert!(health.last_batch_at.is_some());
        assert_eq!(
            pool.worker_health(0).await.unwrap().status,
            WorkerStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_insufficient_devices_fail_one_worker() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 2, 4),
            &cuda(6),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        let health = pool.health().await;
        assert_eq!(health[0].status, WorkerStatus::Ready);
        assert_eq!(health[1].status, WorkerStatus::Failed);
        assert!(health[1].device_set.is_none());
        assert!(health[1].last_error.as_ref().unwrap().contains("Configuration error"));

        let result = pool.submit(1, vec![text("a", "1")]).await;
        assert!(matches!(result, Err(ShardletError::WorkerUnavailable(_))));
        assert!(pool.submit(0, vec![text("a", "1")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_model_load_failure_is_isolated() {
        let dir = model_dir();
        let loader = Arc::new(RecordingLoader {
            fail_worker: Some(1),
            ..Default::default()
        });
        let pool = WorkerPool::start(&config(&dir, 3, 1), &cuda(3), loader)
            .await
            .unwrap();

        let statuses: Vec<WorkerStatus> =
            pool.health().await.into_iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![WorkerStatus::Ready, WorkerStatus::Failed, WorkerStatus::Ready]
        );
        assert_eq!(pool.ready_count().await, 2);
    }

    #[tokio::test]
    async fn test_binding_failure_precedes_load() {
        let dir = model_dir();
        let mut config = config(&dir, 2, 2);
        config.pool.device_ids = Some(vec![0, 1, 2, 9]);
        let loader = Arc::new(RecordingLoader::default());

        let pool = WorkerPool::start(&config, &cuda(4), loader.clone())
            .await
            .unwrap();

        let health = pool.health().await;
        assert_eq!(health[0].status, WorkerStatus::Ready);
        assert_eq!(health[1].status, WorkerStatus::Failed);
        assert!(health[1].last_error.as_ref().unwrap().contains("Device binding"));
        // The failed worker never reached the loader
        let loaded = loader.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, 0);
    }

    #[tokio::test]
    async fn test_missing_model_dir_fails_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServingConfig::default();
        config.model.model_dir = dir.path().join("absent");

        let pool = WorkerPool::start(&config, &cuda(1), Arc::new(RecordingLoader::default()))
            .await
            .unwrap();
        assert_eq!(pool.health().await[0].status, WorkerStatus::Failed);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_then_recovers() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 1, 1),
            &cuda(1),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        let responses = pool
            .submit(0, vec![text("a", "2"), text("b", "99")])
            .await
            .unwrap();
        assert!(responses
            .iter()
            .all(|r| r.category == Some(ErrorCategory::ModelExecution)));
        let health = pool.worker_health(0).await.unwrap();
        assert_eq!(health.status, WorkerStatus::Degraded);
        assert!(health.last_error.is_some());

        let responses = pool.submit(0, vec![text("c", "2")]).await.unwrap();
        assert_eq!(responses[0].status_code, 200);
        assert_eq!(
            pool.worker_health(0).await.unwrap().status,
            WorkerStatus::Serving
        );
    }

    #[tokio::test]
    async fn test_invalid_batch_does_not_change_status() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 1, 1),
            &cuda(1),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        let result = pool.submit(0, Vec::new()).await;
        assert!(matches!(result, Err(ShardletError::InvalidBatch(_))));
        assert_eq!(
            pool.worker_health(0).await.unwrap().status,
            WorkerStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 1, 1),
            &cuda(1),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        let result = pool.submit(5, vec![text("a", "1")]).await;
        assert!(matches!(result, Err(ShardletError::WorkerNotFound(_))));
        assert!(pool.worker_health(5).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let dir = model_dir();
        let pool = WorkerPool::start(
            &config(&dir, 2, 2),
            &cuda(3),
            Arc::new(RecordingLoader::default()),
        )
        .await
        .unwrap();

        pool.shutdown().await;

        let statuses: Vec<WorkerStatus> =
            pool.health().await.into_iter().map(|h| h.status).collect();
        // The failed worker stays failed
        assert_eq!(statuses, vec![WorkerStatus::Stopped, WorkerStatus::Failed]);

        let result = pool.submit(0, vec![text("a", "1")]).await;
        assert!(matches!(result, Err(ShardletError::WorkerUnavailable(_))));
    }
}
