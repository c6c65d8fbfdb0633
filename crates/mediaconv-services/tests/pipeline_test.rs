//! End-to-end pipeline tests: ingest, thumbnail, convert, download.
//!
//! Run with: cargo test -p mediaconv-services --test pipeline_test

mod helpers;

use futures::TryStreamExt;
use helpers::fixtures::{archive_entry, archive_names, batch_zip, png};
use helpers::{setup_test_app, setup_test_app_with, test_config, TestApp};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use mediaconv_core::models::{JobPhase, JobStatus, MediaStatus, Rendition};
use mediaconv_core::AppError;
use mediaconv_db::JobStore;
use mediaconv_services::IngestOptions;
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;
use mediaconv_worker::{JobEventKind, Task, TaskHandlerContext};

async fn download_bytes(app: &TestApp, job_id: Uuid, name: Option<&str>) -> (String, Vec<u8>) {
    let download = app
        .service
        .download(job_id, name.map(str::to_string))
        .await
        .unwrap();
    let chunks: Vec<_> = download.stream.try_collect().await.unwrap();
    (download.filename, chunks.concat())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_of_75_converts_in_chunks_and_downloads() {
    let app = setup_test_app().await;
    let job = app.service.create_job(Some("Mariage".to_string())).await.unwrap();

    let upload = app.upload("Mariage.zip", &batch_zip(75)).await;
    let ids = app
        .service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(ids.len(), 75);

    let runs = app.drain().await;
    assert_eq!(runs.get("thumbnails"), Some(&3));
    let status = app.service.get_status(job.id).await.unwrap();
    assert_eq!(status.phase, JobPhase::Uploaded);
    assert_eq!(status.totals.total, 75);

    app.service.start_conversion(job.id).await.unwrap();
    let runs = app.drain().await;
    assert_eq!(runs.get("conversion"), Some(&3));

    let status = app.service.get_status(job.id).await.unwrap();
    assert_eq!(status.phase, JobPhase::Ready);
    assert_eq!(status.totals.completed, 75);
    assert_eq!(status.processed_count, 75);
    assert!(status.failed_items.is_empty());

    let (filename, bytes) = download_bytes(&app, job.id, None).await;
    assert_eq!(filename, "Mariage.zip");
    let names = archive_names(&bytes);
    assert_eq!(names.len(), 75);
    assert_eq!(names.iter().collect::<HashSet<_>>().len(), 75);
    assert!(names.contains(&"Mariage/Mariage/a/img_000.jpg".to_string()));
    assert!(names.contains(&"Mariage/Mariage/b/img_000.jpg".to_string()));
    assert!(names.iter().all(|n| !n.contains("__MACOSX")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reinvoking_a_drained_chunk_does_nothing() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("one.png", &png(1)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;
    let processed = app.processed_count(job.id).await;

    app.worker
        .clone()
        .dispatch_task(&Task::Thumbnails { job_id: job.id })
        .await
        .unwrap();

    assert!(app.dispatcher.pending().is_empty());
    assert_eq!(app.processed_count(job.id).await, processed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_buffered_download_matches_streaming_contents() {
    let config = mediaconv_core::PipelineConfig {
        archive_streaming: false,
        ..test_config()
    };
    let app = setup_test_app_with(config).await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("batch.zip", &batch_zip(6)).await;
    app.service
        .ingest(job.id, upload, Some("Photos"), IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;
    app.service.start_conversion(job.id).await.unwrap();
    app.drain().await;

    let (filename, bytes) = download_bytes(&app, job.id, Some("Export")).await;
    assert_eq!(filename, "Export.zip");
    let names = archive_names(&bytes);
    assert_eq!(names.len(), 6);
    assert!(names.iter().all(|n| n.starts_with("Export/Photos/batch/")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_blob_is_skipped_in_archive() {
    let app = setup_test_app().await;
    let job = app.service.create_job(Some("Set".to_string())).await.unwrap();
    let upload = app.upload("set.zip", &batch_zip(10)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;
    app.service.start_conversion(job.id).await.unwrap();
    app.drain().await;

    let media = app.store.list_media(job.id).await.unwrap();
    let lost = &media[0];
    app.storage
        .delete(&rendition_key(job.id, lost.id, Rendition::Converted))
        .await
        .unwrap();

    let (_, bytes) = download_bytes(&app, job.id, None).await;
    assert_eq!(archive_names(&bytes).len(), 9);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fast_path_ships_original_bytes_and_name() {
    let app = setup_test_app().await;
    let job = app.service.create_job(Some("Raw".to_string())).await.unwrap();
    let original = png(7);
    let upload = app.upload("Portrait.png", &original).await;
    app.service
        .ingest(
            job.id,
            upload,
            None,
            IngestOptions {
                skip_conversion: true,
            },
        )
        .await
        .unwrap();
    app.drain().await;
    app.service.start_conversion(job.id).await.unwrap();
    app.drain().await;

    let status = app.service.get_status(job.id).await.unwrap();
    assert_eq!(status.phase, JobPhase::Ready);
    let item = &status.items[0];
    assert_eq!(item.status, MediaStatus::Completed);
    assert!(!item.renditions.contains(&"converted".to_string()));

    let (_, bytes) = download_bytes(&app, job.id, None).await;
    assert_eq!(archive_names(&bytes), vec!["Raw/Portrait.png".to_string()]);
    assert_eq!(archive_entry(&bytes, "Raw/Portrait.png"), original);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_converting_row_is_repaired_on_status_read() {
    let config = mediaconv_core::PipelineConfig {
        claim_ttl: Duration::ZERO,
        ..test_config()
    };
    let app = setup_test_app_with(config).await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("one.png", &png(3)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;

    // Simulate a worker that stored the rendition but died before finishing the row.
    let stale = app
        .store
        .claim_media(
            job.id,
            mediaconv_core::models::ClaimKind::Conversion,
            1,
            Uuid::new_v4(),
            app.config.stale_claim_cutoff(),
        )
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    app.storage
        .upload_with_key(
            &rendition_key(job.id, stale[0].id, Rendition::Converted),
            png(3),
            "image/jpeg",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let status = app.service.get_status(job.id).await.unwrap();
    assert_eq!(status.items[0].status, MediaStatus::Completed);
    assert_eq!(status.phase, JobPhase::Ready);
}

#[tokio::test]
async fn test_start_conversion_rejects_empty_job() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();

    let err = app.service.start_conversion(job.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    let err = app.service.download(job.id, None).await.err().unwrap();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert!(app.dispatcher.pending().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_thumbnail_failure_stops_waiting_conversion() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("batch.zip", &batch_zip(4)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.service.start_conversion(job.id).await.unwrap();

    let (thumbnails, _) = app.dispatcher.pop().unwrap();
    assert_eq!(thumbnails, Task::Thumbnails { job_id: job.id });
    app.worker
        .clone()
        .on_terminal_failure(&thumbnails, &anyhow::anyhow!("decoder crashed"))
        .await;

    let runs = app.drain().await;
    assert_eq!(runs.get("conversion"), Some(&1));
    assert!(app.dispatcher.pending().is_empty());

    let stored = app.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminal_chunk_failure_fails_job_once() {
    let app = setup_test_app().await;
    let job = app.service.create_job(None).await.unwrap();
    let upload = app.upload("one.png", &png(3)).await;
    app.service
        .ingest(job.id, upload, None, IngestOptions::default())
        .await
        .unwrap();
    app.drain().await;
    app.service.start_conversion(job.id).await.unwrap();

    let mut events = app.service.subscribe();
    let task = Task::Conversion { job_id: job.id };
    let error = anyhow::anyhow!("timed out");
    app.worker.clone().on_terminal_failure(&task, &error).await;
    app.worker.clone().on_terminal_failure(&task, &error).await;

    let stored = app.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);

    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        if event.job_id == job.id && event.kind == JobEventKind::Failed {
            failed += 1;
        }
    }
    assert_eq!(failed, 1);

    let err = app.service.start_conversion(job.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}
