use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::constants::{DRIVER_SCRIPT_NAME, MAX_OUTPUT_READ_LINES, OUTPUT_EOF_SENTINEL};
use crate::domain::{ExecutionProfile, SandboxRequest};

/// Prepares and tears down the per-execution directory a sandbox mounts
/// into its container: source and stdin files, pre-created output files
/// and a copy of the driver script.
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    driver_script: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, driver_script: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            driver_script: driver_script.into(),
        }
    }

    /// Creates a fresh unique workspace for the request, directly under
    /// the per-language directory so cleanup removes everything the
    /// preparation created. On any failure the partially-built directory
    /// is removed before the error is propagated, so a failed
    /// preparation never leaks a directory.
    pub async fn prepare(&self, request: &SandboxRequest) -> io::Result<Workspace> {
        let path = self
            .root
            .join(&request.profile.language)
            .join(Uuid::new_v4().as_simple().to_string());

        tokio::fs::create_dir_all(&path).await?;

        let workspace = Workspace::new(path, &request.profile);
        if let Err(e) = self.populate(&workspace, request).await {
            workspace.cleanup().await;
            return Err(e);
        }

        Ok(workspace)
    }

    async fn populate(&self, workspace: &Workspace, request: &SandboxRequest) -> io::Result<()> {
        let language = &request.profile.language;

        tokio::fs::write(
            workspace.path.join(format!("{language}.source")),
            request.source_code.join("\n"),
        )
        .await?;

        tokio::fs::write(
            workspace.path.join(format!("{language}.input")),
            request.stdin_data.join("\n"),
        )
        .await?;

        // The output files always exist, even when the program writes
        // nothing, so the capture step never has to special-case a run
        // that produced no output file.
        tokio::fs::write(&workspace.stdout_path, "").await?;
        tokio::fs::write(&workspace.stderr_path, "").await?;

        tokio::fs::copy(
            &self.driver_script,
            workspace.path.join(DRIVER_SCRIPT_NAME),
        )
        .await?;

        Ok(())
    }
}

/// One prepared execution directory, exclusively owned by a single
/// sandbox for its lifetime.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl Workspace {
    fn new(path: PathBuf, profile: &ExecutionProfile) -> Self {
        let stdout_path = path.join(&profile.stdout_file);
        let stderr_path = path.join(&profile.stderr_file);
        Self {
            path,
            stdout_path,
            stderr_path,
        }
    }

    /// The bind-mount source for the container engine, in the posix
    /// form the engine expects regardless of the host's native path
    /// representation.
    pub fn bind_source(&self) -> io::Result<String> {
        Ok(to_posix_path(&std::path::absolute(&self.path)?))
    }

    pub fn read_stdout(&self) -> io::Result<Vec<String>> {
        read_output_lines(&self.stdout_path)
    }

    pub fn read_stderr(&self) -> io::Result<Vec<String>> {
        read_output_lines(&self.stderr_path)
    }

    /// Deletes the workspace directory. Consumes the workspace, so the
    /// deletion happens exactly once; failures are logged since there
    /// is nothing left to recover.
    pub async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            tracing::error!(path = %self.path.display(), "failed to remove workspace: {e}");
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads at most [`MAX_OUTPUT_READ_LINES`] lines from a captured output
/// file. When the bound is hit and the final read line does not start
/// with the end-of-output sentinel, the file's true last line is
/// appended so truncation stays visible alongside the real final line.
/// A missing file yields an empty sequence.
pub fn read_output_lines(path: &Path) -> io::Result<Vec<String>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut lines = Vec::new();
    let mut overflow_last = None;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if lines.len() < MAX_OUTPUT_READ_LINES {
            lines.push(line);
        } else {
            overflow_last = Some(line);
        }
    }

    let truncated = lines.len() == MAX_OUTPUT_READ_LINES
        && !lines[MAX_OUTPUT_READ_LINES - 1].starts_with(OUTPUT_EOF_SENTINEL);
    if truncated {
        let last = overflow_last.unwrap_or_else(|| lines[MAX_OUTPUT_READ_LINES - 1].clone());
        lines.push(last);
    }

    Ok(lines)
}

/// Converts a host path into the posix-style absolute form the engine
/// expects as a bind-mount source, e.g. `C:\a\b` becomes `/c/a/b`.
fn to_posix_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");

    match raw.split_once(':') {
        Some((drive, rest)) => format!("/{}{}", drive.to_lowercase(), rest),
        None => raw,
    }
}
