//! Builtin tools and the agent-level tools built on top of them

pub mod agent_tool;
pub mod create_agent;
pub mod delete_agent;
pub mod read_file;
pub mod script;
pub mod send_message;
pub mod shell;
pub mod task_complete;
pub mod write_file;

pub use agent_tool::{AgentTool, SharedAgent};
pub use create_agent::{CreateAgentTool, SpawnContext};
pub use delete_agent::DeleteAgentTool;
pub use read_file::ReadFileTool;
pub use script::{discover_scripts, ScriptTool};
pub use send_message::SendMessageTool;
pub use shell::ShellTool;
pub use task_complete::TaskCompleteTool;
pub use write_file::WriteFileTool;

use crate::error::ToolError;
use crate::tool::ToolRegistry;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Lexically normalize `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a tool-supplied path against the working directory.
///
/// The result must stay inside the working directory.
pub(crate) fn resolve_path(working_dir: &Path, path: &str) -> Result<PathBuf, ToolError> {
    let base = if working_dir.is_absolute() {
        normalize(working_dir)
    } else {
        let cwd = std::env::current_dir().map_err(|e| ToolError::Io {
            path: working_dir.to_path_buf(),
            source: e,
        })?;
        normalize(&cwd.join(working_dir))
    };
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };
    let resolved = normalize(&joined);
    if resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        Err(ToolError::Other(format!(
            "Path is outside working directory: {}",
            path
        )))
    }
}

/// Register the builtin primitives every agent gets
pub fn register_builtins(registry: &ToolRegistry, shell_timeout: Duration) {
    registry.register(ReadFileTool::new());
    registry.register(WriteFileTool::new());
    registry.register(ShellTool::new(shell_timeout));
    registry.register(TaskCompleteTool::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_stays_inside() {
        let base = Path::new("/work/project");
        assert_eq!(
            resolve_path(base, "src/./main.rs").unwrap(),
            PathBuf::from("/work/project/src/main.rs")
        );
        assert_eq!(
            resolve_path(base, "a/../b.txt").unwrap(),
            PathBuf::from("/work/project/b.txt")
        );
        assert_eq!(
            resolve_path(base, "/work/project/notes.md").unwrap(),
            PathBuf::from("/work/project/notes.md")
        );
        assert!(resolve_path(base, "../other/file").is_err());
        assert!(resolve_path(base, "/etc/passwd").is_err());
        assert!(resolve_path(base, "/work/project-evil/x").is_err());
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::new();
        register_builtins(&registry, Duration::from_secs(5));
        assert_eq!(
            registry.names(),
            vec!["read_file", "write_file", "shell", "task_complete"]
        );
    }
}
