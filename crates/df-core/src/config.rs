//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the HTTP server, the conversion engine, the worker pool,
//! workspaces and the format matrix. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::format::FormatSupport;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub pool: PoolConfig,
    pub workspace: WorkspaceConfig,
    pub formats: FormatSupport,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Read and parse a config file, failing on any error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it fails to parse.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }
        if self.server.max_upload_bytes == 0 {
            warnings.push("server.max_upload_bytes is 0; every upload will be rejected".into());
        }

        if self.pool.workers == 0 {
            warnings.push("pool.workers is 0; one worker will be started".into());
        }
        if self.pool.queue_capacity == Some(0) {
            warnings.push("pool.queue_capacity is 0; a capacity of 1 will be used".into());
        }
        if self.pool.max_attempts == 0 {
            warnings.push("pool.max_attempts is 0; each job gets a single attempt".into());
        }

        if self.engine.timeout_secs == 0 {
            warnings.push("engine.timeout_secs is 0; every conversion will time out".into());
        }
        if self.engine.max_output_bytes == 0 {
            warnings.push("engine.max_output_bytes is 0; engine diagnostics will be empty".into());
        }
        if let Some(ref program) = self.engine.program {
            if program.is_absolute() && !program.exists() {
                warnings.push(format!(
                    "engine.program {} does not exist; falling back to PATH lookup",
                    program.display()
                ));
            }
        }
        if let Some(ref args) = self.engine.args {
            if !args.iter().any(|a| a.contains("{input}")) {
                warnings.push("engine.args never references {input}".into());
            }
        }

        if self.formats.sources.is_empty() {
            warnings.push("formats.sources is empty; every request will be rejected".into());
        }
        if self.formats.targets.is_empty() {
            warnings.push("formats.targets is empty; every request will be rejected".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// External conversion engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable. When unset, `soffice` and then `libreoffice` are
    /// looked up in `PATH`.
    pub program: Option<PathBuf>,
    /// Argument template. Placeholders: `{input}`, `{outdir}`, `{target}`,
    /// `{filter}`, `{profile}`. When unset, the headless office preset is used.
    pub args: Option<Vec<String>>,
    /// Per-attempt time budget in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
    /// Cap on captured bytes per engine output stream.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

/// Default cap on captured engine output per stream (64 KiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

fn default_engine_timeout() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: None,
            timeout_secs: default_engine_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Worker pool and queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers (engine instances).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending-job capacity. Defaults to four times the worker count.
    pub queue_capacity: Option<usize>,
    /// Engine invocations per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Total bytes of finished results held for detached jobs awaiting
    /// download. The oldest are dropped first when it is exceeded.
    #[serde(default = "default_result_budget")]
    pub result_budget_bytes: usize,
}

/// Default budget for parked results of detached jobs (512 MiB).
pub const DEFAULT_RESULT_BUDGET_BYTES: usize = 512 * 1024 * 1024;

fn default_result_budget() -> usize {
    DEFAULT_RESULT_BUDGET_BYTES
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: None,
            max_attempts: default_max_attempts(),
            result_budget_bytes: default_result_budget(),
        }
    }
}

impl PoolConfig {
    /// Worker count, never below one.
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }

    /// Queue capacity, never below one.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.effective_workers() * 4)
            .max(1)
    }

    /// Attempt bound, never below one.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Where per-job workspaces are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("docforge"),
        }
    }
}
