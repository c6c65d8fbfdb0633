//! Application state shared by the handlers.

use mediaconv_core::PipelineConfig;
use mediaconv_services::ConversionService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: ConversionService,
    pub config: Arc<PipelineConfig>,
}
