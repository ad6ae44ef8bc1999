//! df-convert: everything that touches the external conversion engine.
//!
//! - [`workspace`]: per-attempt temporary directories ([`WorkspaceManager`],
//!   [`Workspace`]).
//! - [`command`]: supervised process execution with timeout, output caps and
//!   process-group kill ([`ToolCommand`]).
//! - [`tools`]: engine discovery ([`ToolRegistry`]).
//! - [`converter`]: the [`Converter`] seam, outcome classification and the
//!   real [`CommandConverter`].
//! - [`scripted`]: a deterministic [`ScriptedConverter`] for tests.

pub mod command;
pub mod converter;
pub mod scripted;
pub mod tools;
pub mod workspace;

pub use command::{ToolCommand, ToolOutput, ToolRun};
pub use converter::{
    collect_output, CommandConverter, ConversionOutcome, Converter, DIAGNOSTIC_LIMIT,
};
pub use scripted::{Gate, ScriptedConverter, Step};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::{Workspace, WorkspaceManager};
