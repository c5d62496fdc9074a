//! Project-build backends.
//!
//! A backend knows how to fetch and build one kind of project inside the
//! scratch directory and where the resulting binary ends up. The pipeline
//! drives it through [`Backend`] and never looks at its internals.

use crate::command_runner::CommandRunner;
use crate::config::{StagingConfig, StagingPaths};
use crate::error::{BackendError, ConfigError};
use crate::image;
use crate::placeholder::PlaceholderMapping;
use std::fs;
use std::path::{Path, PathBuf};

pub mod cmake;
pub mod go;

pub use cmake::{CmakeBackend, CmakeOptions};
pub use go::{GoBackend, GoOptions};

pub trait Backend {
    /// Short name, used for the scratch directory prefix and in messages.
    fn name(&self) -> &'static str;

    /// Placeholders users can put in asset and exclude paths.
    ///
    /// Only meaningful after [`Backend::setup_paths`].
    fn placeholder_mapping(&self) -> PlaceholderMapping;

    /// Check backend options before anything touches the disk.
    fn validate(&self, config: &StagingConfig) -> Result<(), ConfigError>;

    /// Derive backend paths from the shared staging paths.
    fn setup_paths(
        &mut self,
        paths: &StagingPaths,
        config: &StagingConfig,
    ) -> Result<(), BackendError>;

    /// Directories the pipeline creates before a fresh build.
    fn directories_to_make(&self) -> Vec<PathBuf>;

    /// Fetch and build the project.
    fn prepare_project(
        &mut self,
        runner: &dyn CommandRunner,
        config: &StagingConfig,
    ) -> Result<(), BackendError>;

    /// Pick the built binary that becomes the image entrypoint.
    fn locate_binary(&mut self, config: &StagingConfig) -> Result<(), BackendError>;

    /// Assets the backend contributes, with the binary placed in `image_bin_dir`.
    fn assets(&self, image_bin_dir: &Path) -> Result<Vec<String>, BackendError>;

    fn excluded_assets(&self) -> Vec<String> {
        Vec::new()
    }

    /// File name of the located binary.
    fn binary_name(&self) -> Option<&str>;

    /// Checkout of the project, if the backend has one to inspect for VCS info.
    fn repo_path(&self) -> Option<PathBuf>;

    fn image_name(&self, config: &StagingConfig) -> String {
        image::image_name(&config.project, config.use_binary.as_deref())
    }

    fn image_file_name(&self, config: &StagingConfig) -> String {
        image::image_file_name(&config.project, config.use_binary.as_deref())
    }
}

/// Choose the entrypoint among the files in `dir`.
///
/// A single binary is taken as is (unless `use_binary` names another one).
/// Several binaries need `use_binary` to pick one.
pub fn select_binary(dir: &Path, use_binary: Option<&str>) -> Result<String, BackendError> {
    let io_error = |source| BackendError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut available: Vec<String> = fs::read_dir(dir)
        .map_err(io_error)?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()
        .map_err(io_error)?;
    available.sort();

    if available.is_empty() {
        return Err(BackendError::NoBinaries {
            dir: dir.to_path_buf(),
        });
    }

    let selected = match use_binary {
        None if available.len() == 1 => available.remove(0),
        None => {
            return Err(BackendError::AmbiguousBinaries {
                dir: dir.to_path_buf(),
                available,
            })
        }
        Some(requested) if available.iter().any(|name| name == requested) => {
            requested.to_string()
        }
        Some(requested) => {
            return Err(BackendError::BinaryNotFound {
                dir: dir.to_path_buf(),
                requested: requested.to_string(),
                available,
            })
        }
    };

    tracing::debug!(binary = %selected, dir = %dir.display(), "selected binary");
    Ok(selected)
}
