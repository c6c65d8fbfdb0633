//! Deletion guard and teardown tests.
//!
//! Run with: cargo test -p mediaconv-services --test deletion_test

mod helpers;

use helpers::fixtures::{batch_zip, png};
use helpers::setup_test_app;
use std::time::Duration;

use mediaconv_core::AppError;
use mediaconv_db::JobStore;
use mediaconv_services::IngestOptions;
use mediaconv_storage::Storage;
use mediaconv_worker::{JobEventKind, Task, TaskHandlerContext};

#[tokio::test(flavor = "multi_thread")]
async fn test_deletion_guard_stops_chunks_and_uploads() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("big.zip", &batch_zip(75)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();

    // First chunk runs and re-arms.
    assert_eq!(app.run_next().await, Some(Task::Thumbnails { job_id: job.id }));
    assert_eq!(app.processed_count(job.id).await, 30);
    assert_eq!(app.dispatcher.pending(), vec![Task::Thumbnails { job_id: job.id }]);

    app.service.delete_job(job.id).await.unwrap();
    let status = app.service.get_status(job.id).await.unwrap();
    assert!(status.deletion_in_progress);

    // The re-armed chunk sees the guard and does nothing.
    app.run_next().await;
    assert_eq!(app.processed_count(job.id).await, 30);

    let upload = app.upload("late.png", &png(1)).await;
    let err = app
        .service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    let err = app.service.start_conversion(job.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let events = app.service.subscribe();
    let runs = app.drain().await;
    assert_eq!(runs.get("deletion"), Some(&1));
    let event = app
        .service
        .wait_for(events, job.id, &[JobEventKind::Deleted], Duration::from_secs(1))
        .await;
    assert!(event.is_some());

    let err = app.service.get_status(job.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(app.store.list_media(job.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deletion_removes_every_blob() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("pic.png", &png(2)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;
    app.service.start_conversion(job.id).await.unwrap();
    app.drain().await;

    let media = app.store.list_media(job.id).await.unwrap();
    let original = media[0].original_key.clone();
    assert!(app.storage.exists(&original).await.unwrap());

    app.service.delete_job(job.id).await.unwrap();
    app.drain().await;

    assert!(!app.storage.exists(&original).await.unwrap());
    for rendition in mediaconv_core::models::Rendition::ALL {
        let key = mediaconv_storage::keys::rendition_key(job.id, media[0].id, rendition);
        assert!(!app.storage.exists(&key).await.unwrap());
    }
}

#[tokio::test]
async fn test_delete_is_idempotent_while_in_progress() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();

    app.service.delete_job(job.id).await.unwrap();
    app.service.delete_job(job.id).await.unwrap();

    assert_eq!(app.dispatcher.pending(), vec![Task::Deletion { job_id: job.id }]);
}

#[tokio::test]
async fn test_delete_unknown_job_is_not_found() {
    let app = setup_test_app().await;
    let err = app.service.delete_job(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_terminal_deletion_failure_releases_guard() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    app.service.delete_job(job.id).await.unwrap();

    let (task, _) = app.dispatcher.pop().unwrap();
    assert_eq!(task, Task::Deletion { job_id: job.id });

    let events = app.service.subscribe();
    app.worker
        .clone()
        .on_terminal_failure(&task, &anyhow::anyhow!("blob store unreachable"))
        .await;

    let stored = app.store.get_job(job.id).await.unwrap().unwrap();
    assert!(!stored.deletion_in_progress);
    let event = app
        .service
        .wait_for(events, job.id, &[JobEventKind::Failed], Duration::from_secs(1))
        .await;
    assert!(event.is_some());

    // A retry is accepted again.
    app.service.delete_job(job.id).await.unwrap();
    assert_eq!(app.dispatcher.pending(), vec![Task::Deletion { job_id: job.id }]);
}
