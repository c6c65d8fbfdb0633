//! Wiring of stores, caches, the task queue and the worker context.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};

use mediaconv_core::{PipelineConfig, ProgressTracker};
use mediaconv_db::{JobStore, MemoryJobStore, PgJobStore};
use mediaconv_infra::MokaCache;
use mediaconv_services::ConversionService;
use mediaconv_storage::{LocalStorage, Storage};
use mediaconv_worker::{
    JobEventBus, TaskHandlerContext, TaskQueue, TracingReclaimer, WorkerContext, WorkerDeps,
};

use crate::state::AppState;

/// Running services. The queue only holds the worker weakly, so this owns it.
pub struct Services {
    pub state: AppState,
    pub queue: Arc<TaskQueue>,
    pub worker: Arc<WorkerContext>,
}

async fn setup_store(config: &PipelineConfig) -> Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgJobStore::connect(url).await?;
            tracing::info!("Using Postgres row store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory row store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

pub async fn initialize_services(config: PipelineConfig) -> Result<Services> {
    let config = Arc::new(config);
    let store = setup_store(&config).await?;
    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(&config.storage_path, config.storage_base_url.clone())
            .await
            .context("Failed to initialize local storage")?,
    );
    let progress = ProgressTracker::new(Arc::new(MokaCache::default()), config.progress_ttl);
    let events = JobEventBus::new();

    let queue = Arc::new(TaskQueue::new(config.task_queue.clone()));
    let worker = Arc::new(WorkerContext::new(
        WorkerDeps {
            store: store.clone(),
            storage: storage.clone(),
            progress: progress.clone(),
            events: events.clone(),
            reclaimer: Arc::new(TracingReclaimer),
            config: config.clone(),
        },
        queue.clone(),
    ));
    let weak: Weak<dyn TaskHandlerContext> = Arc::downgrade(&worker) as Weak<WorkerContext>;
    queue.start(weak);
    tracing::info!(
        max_workers = config.task_queue.max_workers,
        chunk_size = config.chunk_size,
        "Task queue started"
    );

    let service = ConversionService::new(store, storage, queue.clone(), progress, events, config.clone());

    Ok(Services {
        state: AppState { service, config },
        queue,
        worker,
    })
}
