//! Shared key generation for job blobs.

use mediaconv_core::models::Rendition;
use uuid::Uuid;

pub fn job_prefix(job_id: Uuid) -> String {
    format!("jobs/{}", job_id)
}

/// Key of an uploaded original. `ext` is stored lowercased, without the dot.
pub fn original_key(job_id: Uuid, media_id: Uuid, ext: &str) -> String {
    let ext = ext.trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        format!("{}/originals/{}", job_prefix(job_id), media_id)
    } else {
        format!("{}/originals/{}.{}", job_prefix(job_id), media_id, ext)
    }
}

pub fn rendition_key(job_id: Uuid, media_id: Uuid, rendition: Rendition) -> String {
    format!(
        "{}/renditions/{}/{}.jpg",
        job_prefix(job_id),
        media_id,
        rendition.as_str()
    )
}
