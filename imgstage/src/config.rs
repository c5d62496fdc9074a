//! Options and derived paths for one staging run.

use crate::error::ConfigError;
use imgstage_common::archive::ROOTFS_DIR;
use std::path::PathBuf;

/// Name of the image directory inside the scratch directory.
pub const IMAGE_DIR: &str = "aci";

/// Everything a staging run is configured with, independent of the backend.
#[derive(Debug, Clone, Default)]
pub struct StagingConfig {
    /// Project identifier handed to the backend, e.g. `example.com/app`.
    pub project: String,
    /// Extra entrypoint arguments, in order.
    pub exec: Vec<String>,
    /// Which built binary becomes the entrypoint.
    pub use_binary: Option<String>,
    /// Additional `<image path>:<local path>` assets.
    pub assets: Vec<String>,
    /// Local paths to leave out of the image.
    pub excludes: Vec<String>,
    pub keep_tmp_dir: bool,
    pub tmp_dir: Option<PathBuf>,
    /// Scratch directory of an earlier run whose build is reused.
    pub reuse_tmp_dir: Option<PathBuf>,
    /// Image artifact path; the backend's file name in the working directory otherwise.
    pub output: Option<PathBuf>,
    /// Replacement for `ldd`.
    pub dependency_lister: Option<String>,
}

impl StagingConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn is_reusing(&self) -> bool {
        self.reuse_tmp_dir.is_some()
    }

    /// Backend-independent checks, run before anything touches the disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::MissingProject);
        }

        if let (Some(tmp_dir), Some(reuse_dir)) = (&self.tmp_dir, &self.reuse_tmp_dir) {
            if tmp_dir != reuse_dir {
                return Err(ConfigError::ConflictingTmpDirs {
                    tmp_dir: tmp_dir.clone(),
                    reuse_dir: reuse_dir.clone(),
                });
            }
        }

        if let Some(reuse_dir) = &self.reuse_tmp_dir {
            if !reuse_dir.is_dir() {
                return Err(ConfigError::InvalidReuseDir(reuse_dir.clone()));
            }
        }

        if matches!(&self.dependency_lister, Some(lister) if lister.is_empty()) {
            return Err(ConfigError::EmptyOption("--dependency-lister"));
        }

        Ok(())
    }
}

/// Directories shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub scratch: PathBuf,
    /// `<scratch>/aci`, archived as a whole at the end.
    pub image_dir: PathBuf,
    /// `<scratch>/aci/rootfs`, the staged image root filesystem.
    pub rootfs: PathBuf,
}

impl StagingPaths {
    pub fn under(scratch: impl Into<PathBuf>) -> Self {
        let scratch = scratch.into();
        let image_dir = scratch.join(IMAGE_DIR);
        let rootfs = image_dir.join(ROOTFS_DIR);
        Self {
            scratch,
            image_dir,
            rootfs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_derived_from_scratch() {
        let paths = StagingPaths::under("/tmp/imgstage-go123");
        assert_eq!(paths.image_dir, PathBuf::from("/tmp/imgstage-go123/aci"));
        assert_eq!(paths.rootfs, PathBuf::from("/tmp/imgstage-go123/aci/rootfs"));
    }

    #[test]
    fn project_is_required() {
        let config = StagingConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingProject)));
    }

    #[test]
    fn different_tmp_dirs_conflict() {
        let reuse = tempfile::tempdir().unwrap();
        let config = StagingConfig {
            tmp_dir: Some(PathBuf::from("/somewhere/else")),
            reuse_tmp_dir: Some(reuse.path().to_path_buf()),
            ..StagingConfig::new("example.com/app")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConflictingTmpDirs { .. })
        ));
    }

    #[test]
    fn identical_tmp_dirs_are_fine() {
        let reuse = tempfile::tempdir().unwrap();
        let config = StagingConfig {
            tmp_dir: Some(reuse.path().to_path_buf()),
            reuse_tmp_dir: Some(reuse.path().to_path_buf()),
            ..StagingConfig::new("example.com/app")
        };
        assert!(config.validate().is_ok());
        assert!(config.is_reusing());
    }

    #[test]
    fn reuse_dir_must_exist() {
        let config = StagingConfig {
            reuse_tmp_dir: Some(PathBuf::from("/nonexistent/imgstage-reuse")),
            ..StagingConfig::new("example.com/app")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidReuseDir(_))
        ));
    }

    #[test]
    fn empty_lister_is_rejected() {
        let config = StagingConfig {
            dependency_lister: Some(String::new()),
            ..StagingConfig::new("example.com/app")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyOption("--dependency-lister"))
        ));
    }
}
