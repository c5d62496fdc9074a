//! Version control information for the image's VCS label.

use crate::command_runner::{CommandOptions, CommandRunner};
use crate::error::CommandError;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    Git,
    Hg,
}

impl VcsKind {
    /// Metadata directory at the repository root.
    fn marker(self) -> &'static str {
        match self {
            VcsKind::Git => ".git",
            VcsKind::Hg => ".hg",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Hg => "hg",
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsInfo {
    pub kind: VcsKind,
    /// Revision id, suffixed with `+` when the working copy has uncommitted changes.
    pub revision: String,
}

/// Find the repository `path` belongs to, looking upwards.
pub fn detect_kind(path: &Path) -> Option<VcsKind> {
    path.ancestors().find_map(|dir| {
        [VcsKind::Git, VcsKind::Hg]
            .into_iter()
            .find(|kind| dir.join(kind.marker()).exists())
    })
}

/// Revision info for the checkout at `path`, `None` when it is not under
/// version control.
pub fn describe(runner: &dyn CommandRunner, path: &Path) -> Result<Option<VcsInfo>, CommandError> {
    if !path.is_dir() {
        return Ok(None);
    }
    let Some(kind) = detect_kind(path) else {
        return Ok(None);
    };

    let options = CommandOptions::with_cwd(path);
    let revision = match kind {
        VcsKind::Git => {
            let head = capture(runner, "git", &["rev-parse", "HEAD"], &options)?;
            let status = capture(runner, "git", &["status", "--porcelain"], &options)?;
            if status.is_empty() {
                head
            } else {
                format!("{head}+")
            }
        }
        // `hg id -i` already appends `+` for a dirty working copy.
        VcsKind::Hg => capture(runner, "hg", &["id", "-i"], &options)?,
    };

    tracing::debug!(%kind, %revision, path = %path.display(), "found vcs info");
    Ok(Some(VcsInfo { kind, revision }))
}

fn capture(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    options: &CommandOptions,
) -> Result<String, CommandError> {
    let output = runner.run_output(program, args, options)?;
    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
