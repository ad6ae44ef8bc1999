//! External engine detection.
//!
//! The [`ToolRegistry`] discovers and caches the location of the document
//! engine executable (`soffice`, or the `libreoffice` wrapper some
//! distributions ship instead) and reports availability for diagnostics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine executable names, in lookup preference order.
const ENGINE_CANDIDATES: &[&str] = &["soffice", "libreoffice"];

/// Configuration for a single discovered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "soffice").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `--version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
    engine: Option<String>,
}

impl ToolRegistry {
    /// Discover the engine by searching `PATH` (or using the configured
    /// program).
    ///
    /// If [`df_core::config::EngineConfig::program`] is an existing path it is
    /// used directly; a bare name is resolved with [`which::which`]. Otherwise
    /// each of `soffice` and `libreoffice` is looked up in `PATH`. Tools that
    /// are not found are silently omitted from the registry.
    pub fn discover(engine_config: &df_core::config::EngineConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in ENGINE_CANDIDATES {
            if let Ok(path) = which::which(name) {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                    },
                );
            }
        }

        let mut engine = ENGINE_CANDIDATES
            .iter()
            .find(|name| tools.contains_key(**name))
            .map(|name| name.to_string());

        if let Some(ref program) = engine_config.program {
            match resolve_program(program) {
                Some(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "engine".to_string());
                    tools.insert(name.clone(), ToolConfig { name: name.clone(), path });
                    engine = Some(name);
                }
                None => {
                    tracing::warn!(
                        "Configured engine {} not found; falling back to PATH lookup",
                        program.display()
                    );
                }
            }
        }

        Self { tools, engine }
    }

    /// Build a registry around a known engine path (used by tests and
    /// embedders that manage discovery themselves).
    pub fn with_engine(name: impl Into<String>, path: PathBuf) -> Self {
        let name = name.into();
        let mut tools = HashMap::new();
        tools.insert(
            name.clone(),
            ToolConfig {
                name: name.clone(),
                path,
            },
        );
        Self {
            tools,
            engine: Some(name),
        }
    }

    /// Return the [`ToolConfig`] for the given tool, or an
    /// [`df_core::Error::Tool`] if it was not found during discovery.
    pub fn require(&self, name: &str) -> df_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            df_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Return the selected document engine.
    pub fn engine(&self) -> df_core::Result<&ToolConfig> {
        match self.engine {
            Some(ref name) => self.require(name),
            None => Err(df_core::Error::tool(
                "soffice",
                "no document engine found; install LibreOffice or set engine.program",
            )),
        }
    }

    /// Check all known tools and return availability information.
    ///
    /// Runs `--version` on every found tool, so call it off the async
    /// runtime's worker threads.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        let mut names: Vec<&str> = ENGINE_CANDIDATES.to_vec();
        for name in self.tools.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }

        names
            .into_iter()
            .map(|name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }

    /// Iterate over all registered tool configs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToolConfig)> {
        self.tools.iter()
    }
}

/// Resolve a configured program: existing paths are used as-is, bare names
/// go through `PATH`.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.exists() {
        return Some(program.to_path_buf());
    }
    if program.components().count() == 1 {
        return which::which(program).ok();
    }
    None
}

/// Run `<tool> --version` and return the first non-empty line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("--version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_core::config::EngineConfig;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&EngineConfig::default());
        // We cannot guarantee the engine is installed in CI,
        // but the call itself must not panic.
        let _ = registry.engine();
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let registry = ToolRegistry::discover(&EngineConfig::default());
        let result = registry.require("nonexistent_tool_xyz");
        assert!(result.is_err());
    }

    #[test]
    fn check_all_lists_engine_candidates() {
        let registry = ToolRegistry::default();
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["soffice", "libreoffice"]);
        assert!(infos.iter().all(|i| !i.available));
        assert!(registry.engine().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn configured_program_wins() {
        let cfg = EngineConfig {
            program: Some(PathBuf::from("sh")),
            ..EngineConfig::default()
        };
        let registry = ToolRegistry::discover(&cfg);
        let engine = registry.engine().unwrap();
        assert_eq!(engine.name, "sh");
        assert!(engine.path.is_absolute());
    }

    #[test]
    fn with_engine_registers_path() {
        let registry = ToolRegistry::with_engine("fake-engine", PathBuf::from("/opt/fake"));
        assert_eq!(registry.engine().unwrap().path, PathBuf::from("/opt/fake"));
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn tool_config_serialization() {
        let cfg = ToolConfig {
            name: "soffice".to_string(),
            path: PathBuf::from("/usr/bin/soffice"),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("soffice"));
        let back: ToolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "soffice");
    }
}
