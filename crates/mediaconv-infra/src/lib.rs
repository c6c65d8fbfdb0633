//! mediaconv infrastructure library
//!
//! Components shared by the binaries rather than by the domain:
//! - Telemetry initialization
//! - In-memory progress cache (moka)
//! - HTTP error body and request-id middleware

pub mod cache;
pub mod error;
pub mod middleware;
pub mod telemetry;

pub use cache::MokaCache;
pub use error::ErrorResponse;
pub use middleware::{get_request_id, request_id_middleware, RequestId};
pub use telemetry::{init_telemetry, shutdown_telemetry};
