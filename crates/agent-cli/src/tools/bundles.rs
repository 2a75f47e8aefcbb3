//! Tool bundle constructors for role-based agent wiring.
//!
//! Eliminates duplicated `.tool(...)` chains by building `Vec<Box<dyn ToolDyn>>`
//! bundles per role.
//!
//! # Roles
//!
//! - **Worker (Rust specialist)**: read, write, edit, run_command (no list_files)
//! - **Worker (General)**: read, write, edit, list_files, run_command

use std::path::Path;

use rig::tool::ToolDyn;

use super::exec_tool::RunCommandTool;
use super::fs_tools::{ListFilesTool, ReadFileTool, WriteFileTool};
use super::patch_tool::EditFileTool;

/// Which set of tools a worker agent receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Rust specialist: read, write, edit, run_command (no list_files).
    RustSpecialist,
    /// General coder: read, write, edit, list_files, run_command.
    General,
}

/// Build the tool bundle for a worker agent.
pub fn worker_tools(wt_path: &Path, role: WorkerRole) -> Vec<Box<dyn ToolDyn>> {
    let mut tools: Vec<Box<dyn ToolDyn>> = vec![
        Box::new(ReadFileTool::new(wt_path)),
        Box::new(WriteFileTool::new(wt_path)),
        Box::new(EditFileTool::new(wt_path)),
        Box::new(RunCommandTool::new(wt_path)),
    ];

    // General workers also get list_files for directory exploration.
    if role == WorkerRole::General {
        tools.push(Box::new(ListFilesTool::new(wt_path)));
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_rust_specialist_has_4_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = worker_tools(dir.path(), WorkerRole::RustSpecialist);
        assert_eq!(tools.len(), 4, "Rust specialist should have 4 tools");
    }

    #[test]
    fn test_worker_general_has_5_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = worker_tools(dir.path(), WorkerRole::General);
        assert_eq!(tools.len(), 5, "General worker should have 5 tools");
    }
}
