//! The engine seam.
//!
//! A [`Converter`] turns the input file of a [`Workspace`] into the target
//! format and classifies what happened as a [`ConversionOutcome`]. The real
//! implementation is [`CommandConverter`], which drives an external program
//! (LibreOffice by default); tests use
//! [`ScriptedConverter`](crate::scripted::ScriptedConverter).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use df_core::config::EngineConfig;
use df_core::{DocumentFormat, Error};

use crate::command::{truncate, ToolCommand, ToolRun, DEFAULT_MAX_OUTPUT_BYTES};
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Diagnostics attached to outcomes are cut to this many bytes.
pub const DIAGNOSTIC_LIMIT: usize = 8 * 1024;

/// Name of the per-workspace engine profile directory.
const PROFILE_DIR: &str = ".profile";

/// Result of one engine invocation.
#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    /// Exit 0 and a non-empty output file.
    Succeeded(Bytes),
    /// The time budget elapsed; the engine was killed.
    TimedOut { after: Duration },
    /// Non-zero exit or death by signal.
    Crashed {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    /// Exit 0 but nothing usable was written.
    NoOutput { diagnostics: String },
    /// The engine could not be started or its output could not be read.
    Internal(String),
}

impl ConversionOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ConversionOutcome::Succeeded(_) => "succeeded",
            ConversionOutcome::TimedOut { .. } => "timed_out",
            ConversionOutcome::Crashed { .. } => "crashed",
            ConversionOutcome::NoOutput { .. } => "no_output",
            ConversionOutcome::Internal(_) => "internal",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Succeeded(_))
    }

    /// Convert into the output bytes or the matching taxonomy error.
    pub fn into_result(self) -> df_core::Result<Bytes> {
        match self {
            ConversionOutcome::Succeeded(bytes) => Ok(bytes),
            ConversionOutcome::TimedOut { after } => Err(Error::TimedOut { after }),
            ConversionOutcome::Crashed {
                exit_code,
                diagnostics,
            } => Err(Error::ConverterCrashed {
                exit_code,
                diagnostics,
            }),
            ConversionOutcome::NoOutput { diagnostics } => Err(Error::NoOutput { diagnostics }),
            ConversionOutcome::Internal(message) => Err(Error::Internal(message)),
        }
    }
}

/// Invokes and supervises the conversion engine for one attempt.
///
/// Implementations must never leave a process running after `convert`
/// returns, and must report every failure as an outcome rather than panic.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Name used in logs and the admin view.
    fn name(&self) -> &str;

    /// Convert `workspace`'s input file from `source` to `target` within
    /// `timeout`.
    async fn convert(
        &self,
        workspace: &Workspace,
        source: DocumentFormat,
        target: DocumentFormat,
        timeout: Duration,
    ) -> ConversionOutcome;
}

/// Read the engine's output from `workspace` after a clean exit.
///
/// `diagnostics` is what the engine printed; it is attached to
/// [`ConversionOutcome::NoOutput`] when no output file is found.
pub async fn collect_output(
    workspace: &Workspace,
    target: DocumentFormat,
    diagnostics: String,
) -> ConversionOutcome {
    let Some(path) = workspace.locate_output(target) else {
        let diagnostics = if diagnostics.is_empty() {
            format!("no .{} file in workspace", target.extension())
        } else {
            diagnostics
        };
        return ConversionOutcome::NoOutput { diagnostics };
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) if bytes.is_empty() => ConversionOutcome::NoOutput { diagnostics },
        Ok(bytes) => ConversionOutcome::Succeeded(Bytes::from(bytes)),
        Err(e) => ConversionOutcome::Internal(format!(
            "failed to read output {}: {e}",
            path.display()
        )),
    }
}

// ---------------------------------------------------------------------------
// CommandConverter
// ---------------------------------------------------------------------------

/// Headless office invocation. The per-workspace profile keeps concurrent
/// instances from fighting over one user profile lock.
const OFFICE_PRESET: &[&str] = &[
    "--headless",
    "--norestore",
    "--nolockcheck",
    "-env:UserInstallation={profile}",
    "--convert-to",
    "{filter}",
    "--outdir",
    "{outdir}",
    "{input}",
];

/// Runs an external program with an argument template.
///
/// Template placeholders:
///
/// | Placeholder | Replaced with |
/// |-------------|---------------|
/// | `{input}` | absolute path of `input.<source-ext>` |
/// | `{outdir}` | the workspace directory |
/// | `{target}` | target extension, e.g. `docx` |
/// | `{filter}` | office export filter, e.g. `docx:MS Word 2007 XML` |
/// | `{profile}` | `file://` URL of the workspace's engine profile dir |
#[derive(Debug, Clone)]
pub struct CommandConverter {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    max_output_bytes: usize,
}

impl CommandConverter {
    /// A converter running `program` with a custom argument template.
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "engine".to_string());
        Self {
            name,
            program,
            args,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// A converter running `program` with the headless office preset.
    pub fn office(program: PathBuf) -> Self {
        Self::new(program, OFFICE_PRESET.iter().map(|s| s.to_string()).collect())
    }

    /// Build from configuration: the configured (or discovered) engine, with
    /// the configured template or the office preset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] when no engine was discovered.
    pub fn from_config(engine: &EngineConfig, tools: &ToolRegistry) -> df_core::Result<Self> {
        let tool = tools.engine()?;
        let converter = match engine.args {
            Some(ref args) => Self::new(tool.path.clone(), args.clone()),
            None => Self::office(tool.path.clone()),
        }
        .with_max_output_bytes(engine.max_output_bytes);
        tracing::info!(
            program = %converter.program.display(),
            args = ?converter.args,
            "Conversion engine configured"
        );
        Ok(converter)
    }

    /// Cap on captured bytes per engine output stream.
    pub fn with_max_output_bytes(mut self, n: usize) -> Self {
        self.max_output_bytes = n;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Expand the argument template for one attempt.
    pub fn render_args(
        &self,
        workspace: &Workspace,
        target: DocumentFormat,
    ) -> Vec<String> {
        let input = workspace.input_path().to_string_lossy();
        let outdir = workspace.path().to_string_lossy();
        let profile = format!(
            "file://{}",
            workspace.temp_file(PROFILE_DIR).to_string_lossy()
        );

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{outdir}", &outdir)
                    .replace("{target}", target.extension())
                    .replace("{filter}", target.export_filter())
                    .replace("{profile}", &profile)
            })
            .collect()
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(
        &self,
        workspace: &Workspace,
        source: DocumentFormat,
        target: DocumentFormat,
        timeout: Duration,
    ) -> ConversionOutcome {
        let args = self.render_args(workspace, target);
        tracing::debug!(
            job_id = %workspace.job_id(),
            attempt = workspace.attempt(),
            %source,
            %target,
            "Invoking {}",
            self.name
        );

        let run = ToolCommand::new(self.program.clone())
            .args(args)
            .current_dir(workspace.path())
            // Keep the engine's own temp files inside the workspace.
            .env("TMPDIR", workspace.path().to_string_lossy())
            .timeout(timeout)
            .max_output_bytes(self.max_output_bytes)
            .run()
            .await;

        match run {
            Ok(ToolRun::TimedOut { after, .. }) => ConversionOutcome::TimedOut { after },
            Ok(ToolRun::Exited(output)) if !output.success() => ConversionOutcome::Crashed {
                exit_code: output.exit_code(),
                diagnostics: output.diagnostics(DIAGNOSTIC_LIMIT),
            },
            Ok(ToolRun::Exited(output)) => {
                collect_output(workspace, target, output.diagnostics(DIAGNOSTIC_LIMIT)).await
            }
            Err(e) => ConversionOutcome::Internal(truncate(&e.to_string(), DIAGNOSTIC_LIMIT)),
        }
    }
}
