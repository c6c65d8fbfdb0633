//! mediaconv API library
//!
//! HTTP handlers, error rendering and application setup.

pub mod constants;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;

pub use error::HttpAppError;
pub use state::AppState;
