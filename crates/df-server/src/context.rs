//! Application context shared by every route handler via Axum state.

use std::sync::Arc;

use df_convert::{Converter, ToolRegistry};
use df_core::config::Config;
use df_core::events::EventBus;
use df_jobs::ConversionService;

/// Cheaply cloneable bundle of `Arc`s handed to handlers.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Queue, workers and job registry.
    pub service: Arc<ConversionService>,
    /// Lifecycle events and the recent-failure log.
    pub event_bus: Arc<EventBus>,
    /// Engine discovery result.
    pub tools: Arc<ToolRegistry>,
}

impl AppContext {
    /// Start the conversion service around `converter` and bundle it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: Config, converter: Arc<dyn Converter>, tools: ToolRegistry) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let service = Arc::new(ConversionService::start(
            &config,
            converter,
            Arc::clone(&event_bus),
        ));
        Self {
            config: Arc::new(config),
            service,
            event_bus,
            tools: Arc::new(tools),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_convert::ScriptedConverter;

    #[tokio::test]
    async fn context_shares_one_event_bus() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.root = root.path().to_path_buf();

        let ctx = AppContext::new(
            config,
            Arc::new(ScriptedConverter::succeeding()),
            ToolRegistry::default(),
        );
        assert!(Arc::ptr_eq(&ctx.event_bus, ctx.service.events()));
        assert_eq!(ctx.service.status().workers, 2);
        ctx.service.shutdown().await;
    }
}
