use std::path::PathBuf;
use thiserror::Error;

/// Problems with the options a run was started with.
///
/// These are the errors the CLI answers with a usage hint.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("got no project to build")]
    MissingProject,
    #[error(
        "specified both a tmp dir ({tmp_dir}) and a tmp dir to reuse ({reuse_dir}) and they are different"
    )]
    ConflictingTmpDirs { tmp_dir: PathBuf, reuse_dir: PathBuf },
    #[error("invalid tmp dir to reuse: {0} is not a directory")]
    InvalidReuseDir(PathBuf),
    #[error("invalid {option}: {path} is not a directory")]
    InvalidDirectory { option: &'static str, path: PathBuf },
    #[error("{0} must not be empty")]
    EmptyOption(&'static str),
}

/// Failures of an external program invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("program '{program}' not found")]
    NotFound { program: String },
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: String },
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("malformed asset '{spec}': expected two absolute paths separated with '{separator}'")]
    Malformed { spec: String, separator: char },
    #[error("{kind} asset path '{path}' has to be absolute")]
    NotAbsolute { kind: &'static str, path: String },
    #[error("error stating {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't handle local asset {} - {kind} is not a file, a directory or a symlink", path.display())]
    UnsupportedNode { path: PathBuf, kind: String },
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dependency lister '{program}' not found; install it or pass --dependency-lister")]
    ListerMissing { program: String },
    #[error("failed to list dependencies of {}: {source}", path.display())]
    Lister {
        path: PathBuf,
        #[source]
        source: CommandError,
    },
    #[error("too many levels of symlinks (>{max}) starting at {}", start.display())]
    SymlinkLoop { start: PathBuf, max: usize },
}

/// Errors reported by project-build backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no binaries found in {}", dir.display())]
    NoBinaries { dir: PathBuf },
    #[error(
        "found multiple binaries in {}, but no binary was selected with --use-binary; available: {}",
        dir.display(),
        available.join(", ")
    )]
    AmbiguousBinaries { dir: PathBuf, available: Vec<String> },
    #[error("no such binary found in {}: {requested}; available: {}", dir.display(), available.join(", "))]
    BinaryNotFound {
        dir: PathBuf,
        requested: String,
        available: Vec<String>,
    },
    #[error("could not find any bin directory under {}", install.display())]
    NoBinDir { install: PathBuf },
    #[error("binary has not been located yet")]
    BinaryNotLocated,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while assembling the image manifest.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("bad image name: {0}")]
    InvalidName(#[source] imgstage_common::CommonError),
    #[error("no binary was located for the image entrypoint")]
    MissingBinary,
}
