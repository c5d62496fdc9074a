//! CMake projects: shallow clone, configure, build and install into a
//! staging prefix.

use super::{select_binary, Backend};
use crate::asset::asset_string;
use crate::command_runner::{run_checked, CommandOptions, CommandRunner};
use crate::config::{StagingConfig, StagingPaths};
use crate::error::{BackendError, ConfigError};
use crate::placeholder::PlaceholderMapping;
use std::path::{Component, Path, PathBuf};

/// Searched in order under the install root when no binary dir is given.
pub const BIN_DIR_CANDIDATES: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

#[derive(Debug, Clone, Default)]
pub struct CmakeOptions {
    /// Binary directory relative to the install root, e.g. `/usr/local/mysql/bin`.
    pub binary_dir: Option<PathBuf>,
    /// Already fetched sources to build instead of cloning.
    pub reuse_src_dir: Option<PathBuf>,
    /// Extra arguments for `cmake`.
    pub cmake_params: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct CmakePaths {
    src: PathBuf,
    build: PathBuf,
    install: PathBuf,
}

pub struct CmakeBackend {
    options: CmakeOptions,
    paths: CmakePaths,
    binary_path: Option<PathBuf>,
}

impl CmakeBackend {
    pub fn new(options: CmakeOptions) -> Self {
        Self {
            options,
            paths: CmakePaths::default(),
            binary_path: None,
        }
    }

    /// Directory under the install root holding the built binaries.
    fn bin_dir(&self) -> Result<PathBuf, BackendError> {
        if let Some(binary_dir) = &self.options.binary_dir {
            return Ok(under_install(&self.paths.install, binary_dir));
        }
        BIN_DIR_CANDIDATES
            .iter()
            .map(|candidate| under_install(&self.paths.install, Path::new(candidate)))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| BackendError::NoBinDir {
                install: self.paths.install.clone(),
            })
    }

    fn clone_sources(
        &self,
        runner: &dyn CommandRunner,
        config: &StagingConfig,
    ) -> Result<(), BackendError> {
        let url = format!("https://{}", config.project);
        let src = self.paths.src.to_string_lossy();
        run_checked(
            runner,
            "git",
            &["clone", "--depth=1", url.as_str(), src.as_ref()],
            &CommandOptions::default(),
        )?;
        Ok(())
    }
}

fn under_install(install: &Path, dir: &Path) -> PathBuf {
    let relative: PathBuf = dir
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    install.join(relative)
}

fn parallel_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|jobs| jobs.get())
        .unwrap_or(1)
}

impl Backend for CmakeBackend {
    fn name(&self) -> &'static str {
        "cmake"
    }

    fn placeholder_mapping(&self) -> PlaceholderMapping {
        PlaceholderMapping::new()
            .with("<SRCPATH>", &self.paths.src)
            .with("<BUILDPATH>", &self.paths.build)
            .with("<INSTALLPATH>", &self.paths.install)
    }

    fn validate(&self, _config: &StagingConfig) -> Result<(), ConfigError> {
        if let Some(src) = &self.options.reuse_src_dir {
            if !src.is_dir() {
                return Err(ConfigError::InvalidDirectory {
                    option: "--reuse-src-dir",
                    path: src.clone(),
                });
            }
        }
        Ok(())
    }

    fn setup_paths(
        &mut self,
        paths: &StagingPaths,
        _config: &StagingConfig,
    ) -> Result<(), BackendError> {
        self.paths = CmakePaths {
            src: self
                .options
                .reuse_src_dir
                .clone()
                .unwrap_or_else(|| paths.scratch.join("src")),
            build: paths.scratch.join("build"),
            install: paths.scratch.join("install"),
        };
        Ok(())
    }

    fn directories_to_make(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if self.options.reuse_src_dir.is_none() {
            dirs.push(self.paths.src.clone());
        }
        dirs.push(self.paths.build.clone());
        dirs.push(self.paths.install.clone());
        dirs
    }

    fn prepare_project(
        &mut self,
        runner: &dyn CommandRunner,
        config: &StagingConfig,
    ) -> Result<(), BackendError> {
        if self.options.reuse_src_dir.is_none() {
            self.clone_sources(runner, config)?;
        } else {
            tracing::info!(src = %self.paths.src.display(), "reusing sources");
        }

        let in_build = CommandOptions::with_cwd(&self.paths.build);
        let src = self.paths.src.to_string_lossy();
        let mut cmake_args: Vec<&str> = self
            .options
            .cmake_params
            .iter()
            .map(String::as_str)
            .collect();
        cmake_args.push(src.as_ref());
        run_checked(runner, "cmake", &cmake_args, &in_build)?;

        let jobs = format!("-j{}", parallel_jobs());
        run_checked(runner, "make", &[jobs.as_str()], &in_build)?;

        let install = in_build
            .clone()
            .env("DESTDIR", self.paths.install.to_string_lossy());
        run_checked(runner, "make", &["install"], &install)?;
        Ok(())
    }

    fn locate_binary(&mut self, config: &StagingConfig) -> Result<(), BackendError> {
        let bin_dir = self.bin_dir()?;
        let binary = select_binary(&bin_dir, config.use_binary.as_deref())?;
        self.binary_path = Some(bin_dir.join(binary));
        Ok(())
    }

    fn assets(&self, image_bin_dir: &Path) -> Result<Vec<String>, BackendError> {
        let path = self
            .binary_path
            .as_ref()
            .ok_or(BackendError::BinaryNotLocated)?;
        let name = path.file_name().ok_or(BackendError::BinaryNotLocated)?;
        Ok(vec![asset_string(image_bin_dir.join(name), path)])
    }

    fn binary_name(&self) -> Option<&str> {
        self.binary_path
            .as_ref()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
    }

    fn repo_path(&self) -> Option<PathBuf> {
        Some(self.paths.src.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::testing::{Reply, StubRunner};
    use std::fs;

    fn backend_with(options: CmakeOptions, scratch: &Path) -> (CmakeBackend, StagingConfig) {
        let config = StagingConfig::new("github.com/example/tool");
        let mut backend = CmakeBackend::new(options);
        backend
            .setup_paths(&StagingPaths::under(scratch), &config)
            .unwrap();
        (backend, config)
    }

    #[test]
    fn placeholders_point_into_scratch() {
        let (backend, _) = backend_with(CmakeOptions::default(), Path::new("/tmp/s"));
        assert_eq!(
            backend
                .placeholder_mapping()
                .substitute("<SRCPATH>:<BUILDPATH>:<INSTALLPATH>"),
            "/tmp/s/src:/tmp/s/build:/tmp/s/install"
        );
        assert_eq!(backend.directories_to_make().len(), 3);
    }

    #[test]
    fn reused_sources_are_not_created_or_cloned() {
        let src = tempfile::tempdir().unwrap();
        let options = CmakeOptions {
            reuse_src_dir: Some(src.path().to_path_buf()),
            cmake_params: vec!["-DCMAKE_BUILD_TYPE=Release".to_string()],
            ..CmakeOptions::default()
        };
        let (mut backend, config) = backend_with(options, Path::new("/tmp/s"));
        assert_eq!(
            backend.directories_to_make(),
            vec![PathBuf::from("/tmp/s/build"), PathBuf::from("/tmp/s/install")]
        );

        let runner = StubRunner::new(Reply::exit(0));
        backend.prepare_project(&runner, &config).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            format!("cmake -DCMAKE_BUILD_TYPE=Release {}", src.path().display())
        );
        assert!(calls[1].starts_with("make -j"));
        assert_eq!(calls[2], "make install");
    }

    #[test]
    fn fresh_build_clones_first() {
        let (mut backend, config) = backend_with(CmakeOptions::default(), Path::new("/tmp/s"));
        let runner = StubRunner::new(Reply::exit(0));
        backend.prepare_project(&runner, &config).unwrap();
        assert_eq!(
            runner.calls()[0],
            "git clone --depth=1 https://github.com/example/tool /tmp/s/src"
        );
    }

    #[test]
    fn failed_clone_stops_the_build() {
        let (mut backend, config) = backend_with(CmakeOptions::default(), Path::new("/tmp/s"));
        let runner = StubRunner::new(Reply::exit(0)).reply("git", Reply::exit(128));
        assert!(backend.prepare_project(&runner, &config).is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn finds_first_existing_bin_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let (mut backend, config) = backend_with(CmakeOptions::default(), scratch.path());
        let bin = scratch.path().join("install/usr/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(scratch.path().join("install/bin")).unwrap();
        fs::write(bin.join("tool"), b"bin").unwrap();

        backend.locate_binary(&config).unwrap();
        assert_eq!(backend.binary_name(), Some("tool"));
        assert_eq!(
            backend.assets(Path::new("/")).unwrap(),
            vec![asset_string("/tool", bin.join("tool"))]
        );
    }

    #[test]
    fn explicit_binary_dir_is_relative_to_install() {
        let scratch = tempfile::tempdir().unwrap();
        let options = CmakeOptions {
            binary_dir: Some(PathBuf::from("/opt/tool/bin")),
            ..CmakeOptions::default()
        };
        let (mut backend, config) = backend_with(options, scratch.path());
        let bin = scratch.path().join("install/opt/tool/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("toold"), b"bin").unwrap();

        backend.locate_binary(&config).unwrap();
        assert_eq!(backend.binary_name(), Some("toold"));
    }

    #[test]
    fn no_bin_dir_is_an_error() {
        let scratch = tempfile::tempdir().unwrap();
        let (mut backend, config) = backend_with(CmakeOptions::default(), scratch.path());
        assert!(matches!(
            backend.locate_binary(&config),
            Err(BackendError::NoBinDir { .. })
        ));
    }

    #[test]
    fn reuse_src_dir_must_be_a_directory() {
        let backend = CmakeBackend::new(CmakeOptions {
            reuse_src_dir: Some(PathBuf::from("/nonexistent/src")),
            ..CmakeOptions::default()
        });
        assert!(matches!(
            backend.validate(&StagingConfig::new("github.com/example/tool")),
            Err(ConfigError::InvalidDirectory { option: "--reuse-src-dir", .. })
        ));
    }
}
