//! Data models for conversion jobs
//!
//! A job owns a set of media rows. Job phase is never stored: it is resolved
//! from aggregate media counts on every read (see [`resolve_phase`]).

mod job;
mod media;
mod phase;
mod progress;

pub use job::{ConversionJob, JobStatus};
pub use media::{
    ClaimKind, ConversionMedia, MediaCounts, MediaOutcome, MediaStatus, MediaSummary, NewMedia,
    Rendition, RenditionManifest,
};
pub use phase::{resolve_phase, JobPhase};
pub use progress::{ProgressPhase, ProgressSnapshot};
