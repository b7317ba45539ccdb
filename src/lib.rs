pub mod app;

use std::sync::Arc;

use tracing::info;

use app::config::load_config;
use app::error::AppError;
use app::events::EventSink;
use app::logging::init_logging;
use app::state::AppState;

/// Loads the config, installs logging, and wires the core for a front-end.
/// Events for the rendering layer are delivered through `sink`.
pub fn bootstrap(sink: EventSink, trace_id: &str) -> Result<Arc<AppState>, AppError> {
    let config = load_config(trace_id)?;
    init_logging(&config.logging.level);
    info!(trace_id = %trace_id, version = %config.version, "core starting");
    Ok(AppState::from_config(config, sink))
}
