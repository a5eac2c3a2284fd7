use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const STDERR_TAIL_LINES: usize = 20;

/// Failure of an external media tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}:\n{stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("`{program}` finished but did not produce {path}")]
    MissingOutput { program: String, path: PathBuf },
}

/// Run `program` in `working_dir` and check that it produced `expected_output`.
pub(crate) async fn run_tool(
    program: &str,
    args: &[String],
    working_dir: &Path,
    expected_output: &Path,
) -> Result<(), ToolError> {
    debug!(program, ?args, dir = %working_dir.display(), "running media tool");

    let output = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    if !working_dir.join(expected_output).is_file() {
        return Err(ToolError::MissingOutput {
            program: program.to_string(),
            path: working_dir.join(expected_output),
        });
    }

    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Escape a value for use inside an ffmpeg filter option.
pub(crate) fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
