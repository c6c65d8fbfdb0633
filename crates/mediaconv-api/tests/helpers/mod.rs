//! Test helpers: real services on an in-memory row store, served through
//! the router.
//!
//! Run with: `cargo test -p mediaconv-api`.

#![allow(dead_code)]

pub mod fixtures;

use axum_test::TestServer;
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;

use mediaconv_api::setup::{routes, services, Services};
use mediaconv_core::{PipelineConfig, TaskQueueSettings};

pub struct TestApp {
    pub server: TestServer,
    pub services: Services,
    pub _temp_dir: TempDir,
}

pub fn test_config(storage: &TempDir) -> PipelineConfig {
    PipelineConfig {
        chunk_size: 4,
        rechunk_delay: Duration::from_millis(5),
        thumb_small_size: 16,
        thumb_large_size: 32,
        max_dimension: 64,
        max_upload_size_bytes: 2 * 1024 * 1024,
        storage_path: storage.path().to_path_buf(),
        database_url: None,
        task_queue: TaskQueueSettings {
            max_workers: 2,
            timeout: Duration::from_secs(30),
            max_attempts: 2,
            backoff: vec![Duration::from_millis(10)],
        },
        ..PipelineConfig::default()
    }
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().unwrap();
    let services = services::initialize_services(test_config(&temp_dir))
        .await
        .unwrap();
    let server = TestServer::new(routes::setup_routes(services.state.clone())).unwrap();
    TestApp {
        server,
        services,
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    /// Poll the status endpoint until the job reaches `phase`.
    pub async fn wait_for_phase(&self, job_id: &str, phase: &str) -> Value {
        for _ in 0..200 {
            let status: Value = self.server.get(&format!("/jobs/{job_id}")).await.json();
            if status["phase"] == phase {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} never reached phase {phase}");
    }
}
