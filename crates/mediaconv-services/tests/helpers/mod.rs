//! Test helpers: wire the services against in-memory stores.
//!
//! Tasks are not executed by a queue. A [`RecordingDispatcher`] collects
//! them and [`TestApp::drain`] runs them one by one, so tests can count
//! invocations per task type.

#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mediaconv_core::{PipelineConfig, ProgressTracker};
use mediaconv_db::{JobStore, MemoryJobStore};
use mediaconv_infra::MokaCache;
use mediaconv_services::{ConversionService, UploadedFile};
use mediaconv_storage::{LocalStorage, Storage};
use mediaconv_worker::{
    JobEventBus, Task, TaskDispatcher, TaskHandlerContext, TracingReclaimer, WorkerContext,
    WorkerDeps,
};

#[derive(Default)]
pub struct RecordingDispatcher {
    pending: Mutex<VecDeque<(Task, Option<Duration>)>>,
}

impl RecordingDispatcher {
    pub fn pop(&self) -> Option<(Task, Option<Duration>)> {
        self.pending.lock().unwrap().pop_front()
    }

    pub fn pending(&self) -> Vec<Task> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(task, _)| *task)
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: Task, delay: Option<Duration>) -> anyhow::Result<()> {
        self.pending.lock().unwrap().push_back((task, delay));
        Ok(())
    }
}

pub struct TestApp {
    pub service: ConversionService,
    pub store: Arc<MemoryJobStore>,
    pub storage: Arc<dyn Storage>,
    pub progress: ProgressTracker,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub worker: Arc<WorkerContext>,
    pub config: Arc<PipelineConfig>,
    pub _temp_dir: TempDir,
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        chunk_size: 30,
        rechunk_delay: Duration::from_millis(10),
        thumb_small_size: 16,
        thumb_large_size: 32,
        max_dimension: 64,
        ..PipelineConfig::default()
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(test_config()).await
}

pub async fn setup_test_app_with(config: PipelineConfig) -> TestApp {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path(), "http://localhost/media".to_string())
            .await
            .unwrap(),
    );
    let store = Arc::new(MemoryJobStore::new());
    let progress = ProgressTracker::new(Arc::new(MokaCache::default()), config.progress_ttl);
    let events = JobEventBus::new();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = Arc::new(config);

    let deps = WorkerDeps {
        store: store.clone(),
        storage: storage.clone(),
        progress: progress.clone(),
        events: events.clone(),
        reclaimer: Arc::new(TracingReclaimer),
        config: config.clone(),
    };
    let worker = Arc::new(WorkerContext::new(deps, dispatcher.clone()));

    let service = ConversionService::new(
        store.clone(),
        storage.clone(),
        dispatcher.clone(),
        progress.clone(),
        events,
        config.clone(),
    );

    TestApp {
        service,
        store,
        storage,
        progress,
        dispatcher,
        worker,
        config,
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    /// Run queued tasks until none are left; returns invocations per task type.
    pub async fn drain(&self) -> HashMap<&'static str, usize> {
        let mut runs = HashMap::new();
        while let Some((task, _)) = self.dispatcher.pop() {
            *runs.entry(task.task_type()).or_default() += 1;
            self.worker.clone().dispatch_task(&task).await.unwrap();
        }
        runs
    }

    /// Run exactly the next queued task.
    pub async fn run_next(&self) -> Option<Task> {
        let (task, _) = self.dispatcher.pop()?;
        self.worker.clone().dispatch_task(&task).await.unwrap();
        Some(task)
    }

    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> UploadedFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), bytes).await.unwrap();
        UploadedFile::from_temp(filename, file).unwrap()
    }

    pub async fn processed_count(&self, job_id: uuid::Uuid) -> u64 {
        self.store
            .get_job(job_id)
            .await
            .unwrap()
            .map(|job| job.processed_count)
            .unwrap_or_default()
    }
}
