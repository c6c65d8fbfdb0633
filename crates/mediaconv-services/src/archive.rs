//! Archive delivery of a job's media.
//!
//! The streaming builder writes a stored (uncompressed) zip straight into
//! the response body from a blocking task, reading one blob at a time. The
//! fallback builds the same archive in a temp file first and serves that;
//! the file is removed when the response stream is dropped.

use anyhow::Context;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use mediaconv_core::models::{ConversionMedia, MediaStatus, ProgressPhase, Rendition};
use mediaconv_core::sanitize::{sanitize_filename, split_extension, UniqueNamer};
use mediaconv_core::ProgressTracker;
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 8;

pub type ArchiveStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One file of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `<root>/<folder>/<file>`, already sanitized and unique.
    pub path: String,
    pub key: String,
}

/// Which blob and name represent a media item in the archive.
///
/// Converted media ship their normalized JPEG; everything else ships the
/// original under its original name.
fn delivered(media: &ConversionMedia) -> (String, String) {
    let converted = media.conversion_status == MediaStatus::Completed
        && !media.fast_path
        && media.manifest.has(Rendition::Converted);

    if converted {
        let (stem, _) = split_extension(&media.original_filename);
        (
            rendition_key(media.job_id, media.id, Rendition::Converted),
            format!("{}.jpg", stem),
        )
    } else {
        (media.original_key.clone(), media.original_filename.clone())
    }
}

/// Lay out archive paths for a job's media, in media order.
pub fn plan_entries(root: &str, media: &[ConversionMedia]) -> Vec<ArchiveEntry> {
    let root = sanitize_filename(root);
    let mut namer = UniqueNamer::new();

    media
        .iter()
        .map(|item| {
            let (key, filename) = delivered(item);
            let filename = namer.claim(&item.folder_path, &sanitize_filename(&filename));
            let path = if item.folder_path.is_empty() {
                format!("{}/{}", root, filename)
            } else {
                format!("{}/{}/{}", root, item.folder_path, filename)
            };
            ArchiveEntry { path, key }
        })
        .collect()
}

/// `Write` end of the response body; buffers into fixed-size chunks.
struct ChannelWriter {
    sender: mpsc::Sender<io::Result<Bytes>>,
    buffer: Vec<u8>,
}

impl ChannelWriter {
    fn new(sender: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            sender,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(CHUNK_SIZE));
        self.sender
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

#[derive(Clone)]
pub struct ArchiveBuilder {
    storage: Arc<dyn Storage>,
    progress: ProgressTracker,
}

impl ArchiveBuilder {
    pub fn new(storage: Arc<dyn Storage>, progress: ProgressTracker) -> Self {
        Self { storage, progress }
    }

    /// Stream the archive as it is written.
    ///
    /// Errors after the first chunk end the stream with an `Err` item; the
    /// client has to start over.
    pub fn stream(&self, job_id: Uuid, entries: Vec<ArchiveEntry>) -> ArchiveStream {
        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let storage = self.storage.clone();
        let progress = self.progress.clone();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let writer = ChannelWriter::new(sender.clone());
            if let Err(e) = write_archive(writer, job_id, &entries, storage.as_ref(), &progress, &handle) {
                tracing::error!(job_id = %job_id, error = %e, "Archive stream aborted");
                let _ = sender.blocking_send(Err(e));
            }
        });

        Box::pin(ReceiverStream::new(receiver))
    }

    /// Build the archive in a temp file, then serve it.
    pub async fn buffered(&self, job_id: Uuid, entries: Vec<ArchiveEntry>) -> anyhow::Result<ArchiveStream> {
        let temp = tempfile::NamedTempFile::new().context("Failed to create archive temp file")?;
        let (file, path) = temp.into_parts();

        let storage = self.storage.clone();
        let progress = self.progress.clone();
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            write_archive(
                io::BufWriter::new(file),
                job_id,
                &entries,
                storage.as_ref(),
                &progress,
                &handle,
            )
        })
        .await
        .context("Archive task panicked")?
        .context("Failed to build archive")?;

        let file = tokio::fs::File::open(&path)
            .await
            .context("Failed to reopen archive temp file")?;

        // The temp path rides along with the stream and is deleted with it.
        let stream = ReaderStream::new(file).map(move |chunk| {
            let _keep = &path;
            chunk
        });
        Ok(Box::pin(stream))
    }
}

/// Write every entry into a zip on `out`. Runs on a blocking thread.
///
/// Entries whose blob is missing are skipped.
fn write_archive<W: Write>(
    out: W,
    job_id: Uuid,
    entries: &[ArchiveEntry],
    storage: &dyn Storage,
    progress: &ProgressTracker,
    handle: &Handle,
) -> io::Result<()> {
    let mut zip = ZipWriter::new_stream(out);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    let total = entries.len() as u64;
    let mut written = 0usize;

    for (index, entry) in entries.iter().enumerate() {
        let blob = match handle.block_on(storage.download_stream(&entry.key)) {
            Ok(blob) => blob,
            Err(e) if e.is_not_found() => {
                tracing::warn!(job_id = %job_id, key = %entry.key, "Blob missing, skipping archive entry");
                continue;
            }
            Err(e) => return Err(io::Error::other(e)),
        };

        zip.start_file(entry.path.as_str(), options)
            .map_err(io::Error::other)?;

        let reader = StreamReader::new(blob.map_err(io::Error::other));
        let mut input = SyncIoBridge::new_with_handle(reader, handle.clone());
        io::copy(&mut input, &mut zip)?;
        written += 1;

        handle.block_on(progress.publish(job_id, ProgressPhase::Archive, index as u64 + 1, total));
    }

    let mut out = zip.finish().map_err(io::Error::other)?;
    out.flush()?;

    tracing::info!(job_id = %job_id, entries = written, skipped = entries.len() - written, "Archive written");
    Ok(())
}
