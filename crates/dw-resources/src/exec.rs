// exec.rs — Shared subprocess runner for non-git external tools.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::ResourceError;

/// Run `<tool> <args>`, returning trimmed stdout. A missing binary maps
/// to ToolMissing; a non-zero exit folds stderr into the error.
pub(crate) fn run_tool(
    tool: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<String, ResourceError> {
    debug!(tool, ?args, "exec");
    let mut command = Command::new(tool);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ResourceError::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            ResourceError::IoError {
                path: cwd.map(|p| p.to_path_buf()).unwrap_or_default(),
                source: e,
            }
        }
    })?;
    if !output.status.success() {
        return Err(ResourceError::Subprocess {
            tool: tool.to_string(),
            args: args.join(" "),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
