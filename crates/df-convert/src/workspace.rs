//! Per-attempt workspace management.
//!
//! A [`Workspace`] is a uniquely named temporary directory under the
//! manager's root holding one attempt's input file, whatever side files the
//! engine produces, and its output file. The directory is removed when the
//! workspace is released *or* dropped, so no exit path (error, panic, task
//! cancellation) can leak it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use df_core::{DocumentFormat, JobId};
use tempfile::TempDir;

/// Prefix shared by every workspace directory name.
const WORKSPACE_PREFIX: &str = "df-";

/// Base name of the input file; the engine keeps it for the output.
const INPUT_STEM: &str = "input";

/// Allocates and tracks workspaces under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    active: Arc<AtomicUsize>,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The directory that holds all workspaces.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of workspaces currently alive.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Create a fresh, empty workspace for one attempt of `job_id` and write
    /// `input` into it as `input.<source-ext>`.
    ///
    /// # Errors
    ///
    /// Returns [`df_core::Error::Io`] if the root or the workspace directory
    /// cannot be created or the input cannot be written. Nothing is left on
    /// disk in that case.
    pub async fn acquire(
        &self,
        job_id: JobId,
        attempt: u32,
        input: &[u8],
        source: DocumentFormat,
    ) -> df_core::Result<Workspace> {
        std::fs::create_dir_all(&self.root)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{WORKSPACE_PREFIX}{}-a{attempt}-", job_id.short()))
            .tempdir_in(&self.root)?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let path = dir.path().to_path_buf();
        let workspace = Workspace {
            input_path: path.join(format!("{INPUT_STEM}.{}", source.extension())),
            path,
            dir: Some(dir),
            job_id,
            attempt,
            active: Arc::clone(&self.active),
        };

        // On failure `workspace` drops here and takes the directory with it.
        tokio::fs::write(&workspace.input_path, input).await?;

        tracing::debug!(
            job_id = %job_id,
            attempt,
            path = %workspace.path.display(),
            "Workspace acquired"
        );
        Ok(workspace)
    }

    /// Remove a workspace. Never fails; problems are logged.
    pub fn release(&self, workspace: Workspace) {
        workspace.release();
    }

    /// Remove workspace directories left behind by a previous process.
    ///
    /// Only call this before any job runs. Returns how many were removed.
    pub fn sweep_stale(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !(is_workspace && is_dir) {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    "Failed to remove stale workspace {}: {e}",
                    entry.path().display()
                ),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {removed} stale workspaces from {}", self.root.display());
        }
        removed
    }
}

/// An isolated directory scope for one conversion attempt.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    input_path: PathBuf,
    job_id: JobId,
    attempt: u32,
    active: Arc<AtomicUsize>,
}

impl Workspace {
    /// The workspace directory (engine working and output directory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The input file written at acquisition.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Where the engine is expected to write the converted document.
    pub fn output_path(&self, target: DocumentFormat) -> PathBuf {
        self.path
            .join(format!("{INPUT_STEM}.{}", target.extension()))
    }

    /// A path for a named side file inside the workspace.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Find the converted document.
    ///
    /// Prefers [`output_path`](Self::output_path); if that is missing, any
    /// other top-level file with the target extension is accepted. Empty
    /// files do not count.
    pub fn locate_output(&self, target: DocumentFormat) -> Option<PathBuf> {
        let expected = self.output_path(target);
        if is_non_empty_file(&expected) {
            return Some(expected);
        }

        let entries = std::fs::read_dir(&self.path).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p != &self.input_path)
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(target.extension()))
            })
            .filter(|p| is_non_empty_file(p))
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Recursively remove the workspace. Tolerates a directory that is
    /// already gone and never fails.
    pub fn release(mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        "Failed to remove workspace {}: {e}",
                        self.path.display()
                    );
                    // Second, best-effort pass for files the engine left locked.
                    let _ = std::fs::remove_dir_all(&self.path);
                }
            }
        }
        tracing::debug!(job_id = %self.job_id, attempt = self.attempt, "Workspace released");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // `TempDir`'s own drop removes the directory, ignoring errors.
        drop(self.dir.take());
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
