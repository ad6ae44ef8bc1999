//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] around a scripted converter
//! with its workspace root in a temp directory. The `with_server*`
//! constructors start Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use df_convert::{ScriptedConverter, ToolRegistry};
use df_core::config::Config;
use df_server::context::AppContext;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub converter: Arc<ScriptedConverter>,
    cancel: CancellationToken,
    server: Option<tokio::task::JoinHandle<df_core::Result<()>>>,
    _root: TempDir,
}

/// Small pool with a short timeout so failure paths finish quickly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pool.workers = 2;
    config.pool.queue_capacity = Some(4);
    config.engine.timeout_secs = 1;
    config
}

impl TestHarness {
    /// Harness around a converter that always succeeds.
    pub fn new() -> Self {
        Self::with_converter(test_config(), ScriptedConverter::succeeding())
    }

    /// Harness around `converter` with the given configuration. The
    /// workspace root is always redirected into a fresh temp directory.
    pub fn with_converter(mut config: Config, converter: ScriptedConverter) -> Self {
        let root = tempfile::tempdir().expect("failed to create workspace root");
        config.workspace.root = root.path().join("workspaces");

        let converter = Arc::new(converter);
        let tools = ToolRegistry::with_engine("soffice", "/opt/office/soffice".into());
        let ctx = AppContext::new(config, converter.clone(), tools);

        Self {
            ctx,
            converter,
            cancel: CancellationToken::new(),
            server: None,
            _root: root,
        }
    }

    /// Start an Axum server with the default harness on a random port.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    /// Start an Axum server around `converter` on a random port.
    pub async fn with_server_converter(
        config: Config,
        converter: ScriptedConverter,
    ) -> (Self, SocketAddr) {
        Self::with_converter(config, converter).serve().await
    }

    async fn serve(mut self) -> (Self, SocketAddr) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        self.server = Some(tokio::spawn(df_server::serve(
            listener,
            self.ctx.clone(),
            self.cancel.clone(),
        )));

        (self, addr)
    }

    /// Stop the server (if any) and drain the conversion service.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(server) = self.server.take() {
            server
                .await
                .expect("server task panicked")
                .expect("server failed");
        }
        self.ctx.service.shutdown().await;
    }
}
