//! The staging pipeline.
//!
//! A run goes through a fixed sequence of stages:
//!
//! ```text
//! Validate → SetupPaths → MakeDirectories → [PrepareProject] → LocateBinary
//!          → CopyAssets → AssembleManifest → WriteImage
//! ```
//!
//! `PrepareProject` is skipped when an earlier run's scratch directory is
//! reused. The first failing stage ends the run. Once a scratch directory has
//! been chosen it is removed when the run ends, however it ends, unless the
//! configuration asks to keep it.

use crate::asset::AssetResolver;
use crate::backend::Backend;
use crate::command_runner::CommandRunner;
use crate::config::{StagingConfig, StagingPaths};
use crate::image::ManifestAssembler;
use crate::platform::Platform;
use anyhow::{Context, Result};
use imgstage_common::{AciWriter, ImageWriter};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory inside the image root the entrypoint binary is staged to.
const IMAGE_BIN_DIR: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    SetupPaths,
    MakeDirectories,
    PrepareProject,
    LocateBinary,
    CopyAssets,
    AssembleManifest,
    WriteImage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::SetupPaths => "setup paths",
            Stage::MakeDirectories => "make directories",
            Stage::PrepareProject => "prepare project",
            Stage::LocateBinary => "locate binary",
            Stage::CopyAssets => "copy assets",
            Stage::AssembleManifest => "assemble manifest",
            Stage::WriteImage => "write image",
        };
        f.write_str(name)
    }
}

fn failed(stage: Stage) -> String {
    format!("stage '{stage}' failed")
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct StagingReport {
    pub image: PathBuf,
    pub image_name: String,
    pub sha256: String,
    /// Entries archived under `rootfs/`.
    pub entries: usize,
    pub binary: String,
    pub assets_processed: usize,
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept_scratch_dir: Option<PathBuf>,
}

/// Removes the scratch directory when dropped, unless it is kept or was never
/// ours to remove.
///
/// An explicit `--tmp-dir` is only armed once `MakeDirectories` has created it.
/// If that directory already existed, that stage fails and the directory is
/// left as it was.
struct ScratchDir {
    path: PathBuf,
    keep: bool,
    armed: bool,
}

impl ScratchDir {
    fn new(path: PathBuf, keep: bool, armed: bool) -> Self {
        Self { path, keep, armed }
    }

    fn arm(&mut self) {
        self.armed = true;
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.keep {
            tracing::info!(path = %self.path.display(), "preserving scratch directory");
            return;
        }
        if !self.armed {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed scratch directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                %err,
                "failed to remove scratch directory"
            ),
        }
    }
}

pub struct StagingPipeline {
    runner: Arc<dyn CommandRunner>,
    writer: Box<dyn ImageWriter>,
    platform: Platform,
}

impl StagingPipeline {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            writer: Box::new(AciWriter::new()),
            platform: Platform::current(),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn ImageWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Build `config.project` with `backend` and write the image.
    pub fn run(&self, backend: &mut dyn Backend, config: &StagingConfig) -> Result<StagingReport> {
        let mut stages = Vec::new();

        config
            .validate()
            .and_then(|()| backend.validate(config))
            .with_context(|| failed(Stage::Validate))?;
        stages.push(Stage::Validate);

        let mut scratch = self
            .allocate_scratch(backend.name(), config)
            .with_context(|| failed(Stage::SetupPaths))?;
        if config.keep_tmp_dir {
            tracing::info!(path = %scratch.path.display(), "scratch directory will be kept");
        }
        let paths = StagingPaths::under(scratch.path.clone());
        backend
            .setup_paths(&paths, config)
            .with_context(|| failed(Stage::SetupPaths))?;
        stages.push(Stage::SetupPaths);

        make_directories(backend, config, &paths, &mut scratch)
            .with_context(|| failed(Stage::MakeDirectories))?;
        stages.push(Stage::MakeDirectories);

        if config.is_reusing() {
            tracing::info!(scratch = %paths.scratch.display(), "reusing previous build");
        } else {
            tracing::info!(project = %config.project, backend = backend.name(), "preparing project");
            backend
                .prepare_project(self.runner.as_ref(), config)
                .with_context(|| failed(Stage::PrepareProject))?;
            stages.push(Stage::PrepareProject);
        }

        backend
            .locate_binary(config)
            .with_context(|| failed(Stage::LocateBinary))?;
        stages.push(Stage::LocateBinary);

        let assets_processed = self
            .copy_assets(backend, config, &paths)
            .with_context(|| failed(Stage::CopyAssets))?;
        stages.push(Stage::CopyAssets);

        let manifest = ManifestAssembler::new(self.runner.as_ref())
            .with_platform(self.platform.clone())
            .assemble(backend, config)
            .with_context(|| failed(Stage::AssembleManifest))?;
        stages.push(Stage::AssembleManifest);

        let output = config
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(backend.image_file_name(config)));
        let written = self
            .writer
            .write_image(&manifest, &paths.image_dir, &output)
            .with_context(|| failed(Stage::WriteImage))?;
        stages.push(Stage::WriteImage);
        tracing::info!(image = %written.path.display(), entries = written.entries, "wrote image");

        Ok(StagingReport {
            image: written.path,
            image_name: manifest.name.to_string(),
            sha256: written.sha256,
            entries: written.entries,
            binary: backend.binary_name().unwrap_or_default().to_string(),
            assets_processed,
            stages,
            kept_scratch_dir: config.keep_tmp_dir.then(|| scratch.path.clone()),
        })
    }

    /// Explicit dir, then reuse dir, then a fresh temporary one.
    fn allocate_scratch(&self, backend: &str, config: &StagingConfig) -> Result<ScratchDir> {
        if let Some(dir) = &config.reuse_tmp_dir {
            return Ok(ScratchDir::new(dir.clone(), config.keep_tmp_dir, true));
        }
        if let Some(dir) = &config.tmp_dir {
            // Armed once MakeDirectories has created it.
            return Ok(ScratchDir::new(dir.clone(), config.keep_tmp_dir, false));
        }
        let dir = tempfile::Builder::new()
            .prefix(&format!("imgstage-{backend}"))
            .keep(true)
            .tempdir()
            .context("failed to set up temporary directory")?;
        Ok(ScratchDir::new(
            dir.path().to_path_buf(),
            config.keep_tmp_dir,
            true,
        ))
    }

    fn copy_assets(
        &self,
        backend: &dyn Backend,
        config: &StagingConfig,
        paths: &StagingPaths,
    ) -> Result<usize> {
        let mut assets = config.assets.clone();
        assets.extend(backend.assets(Path::new(IMAGE_BIN_DIR))?);
        let mut excludes = config.excludes.clone();
        excludes.extend(backend.excluded_assets());
        let mapping = backend.placeholder_mapping();

        let mut resolver = AssetResolver::new(self.runner.as_ref());
        if let Some(lister) = &config.dependency_lister {
            resolver = resolver.with_lister(lister.as_str());
        }
        let processed = resolver.resolve_and_copy(&assets, &paths.rootfs, &mapping, &excludes)?;
        Ok(processed)
    }
}

fn make_directories(
    backend: &dyn Backend,
    config: &StagingConfig,
    paths: &StagingPaths,
    scratch: &mut ScratchDir,
) -> Result<()> {
    if config.is_reusing() {
        match fs::remove_dir_all(&paths.image_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to clean up {}", paths.image_dir.display())
                })
            }
        }
        make_dir(&paths.image_dir)?;
        make_dir(&paths.rootfs)?;
        return Ok(());
    }

    if config.tmp_dir.is_some() {
        make_dir(&paths.scratch)?;
        scratch.arm();
    }
    make_dir(&paths.image_dir)?;
    make_dir(&paths.rootfs)?;
    for dir in backend.directories_to_make() {
        make_dir(&dir)?;
    }
    Ok(())
}

fn make_dir(dir: &Path) -> Result<()> {
    fs::create_dir(dir).with_context(|| format!("failed to make directory {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::asset_string;
    use crate::backend::select_binary;
    use crate::command_runner::testing::{Reply, StubRunner};
    use crate::error::{AssetError, BackendError, CommandError, ConfigError};
    use crate::placeholder::PlaceholderMapping;
    use crate::platform::{Arch, Os};
    use tempfile::TempDir;

    /// Builds by writing `app` into `<scratch>/out`.
    #[derive(Default)]
    struct FakeBackend {
        out: PathBuf,
        scratch: Option<PathBuf>,
        prepared: bool,
        fail_prepare: bool,
        binary: Option<String>,
    }

    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn placeholder_mapping(&self) -> PlaceholderMapping {
            PlaceholderMapping::new().with("<OUT>", &self.out)
        }

        fn validate(&self, _config: &StagingConfig) -> Result<(), ConfigError> {
            Ok(())
        }

        fn setup_paths(
            &mut self,
            paths: &StagingPaths,
            _config: &StagingConfig,
        ) -> Result<(), BackendError> {
            self.out = paths.scratch.join("out");
            self.scratch = Some(paths.scratch.clone());
            Ok(())
        }

        fn directories_to_make(&self) -> Vec<PathBuf> {
            vec![self.out.clone()]
        }

        fn prepare_project(
            &mut self,
            _runner: &dyn CommandRunner,
            _config: &StagingConfig,
        ) -> Result<(), BackendError> {
            if self.fail_prepare {
                return Err(BackendError::Command(CommandError::Failed {
                    program: "fake-build".to_string(),
                    status: "exit status: 1".to_string(),
                }));
            }
            self.prepared = true;
            let binary = self.out.join("app");
            fs::write(&binary, b"\x7fELF app").map_err(|source| BackendError::Io {
                path: binary,
                source,
            })
        }

        fn locate_binary(&mut self, config: &StagingConfig) -> Result<(), BackendError> {
            self.binary = Some(select_binary(&self.out, config.use_binary.as_deref())?);
            Ok(())
        }

        fn assets(&self, image_bin_dir: &Path) -> Result<Vec<String>, BackendError> {
            let binary = self.binary.as_ref().ok_or(BackendError::BinaryNotLocated)?;
            Ok(vec![asset_string(
                image_bin_dir.join(binary),
                self.out.join(binary),
            )])
        }

        fn binary_name(&self) -> Option<&str> {
            self.binary.as_deref()
        }

        fn repo_path(&self) -> Option<PathBuf> {
            None
        }
    }

    fn pipeline() -> StagingPipeline {
        StagingPipeline::new(Arc::new(StubRunner::new(Reply::exit(1)))).with_platform(Platform {
            os: Os::Linux,
            arch: Arch::X86_64,
        })
    }

    fn config_in(work: &TempDir) -> StagingConfig {
        StagingConfig {
            tmp_dir: Some(work.path().join("scratch")),
            output: Some(work.path().join("app.aci")),
            exec: vec!["--verbose".to_string()],
            ..StagingConfig::new("example.com/app")
        }
    }

    #[test]
    fn stages_project_into_image() {
        let work = TempDir::new().unwrap();
        let config = config_in(&work);
        let mut backend = FakeBackend::default();

        let report = pipeline().run(&mut backend, &config).unwrap();

        assert!(backend.prepared);
        assert_eq!(report.image, work.path().join("app.aci"));
        assert_eq!(report.image_name, "example.com/app");
        assert_eq!(report.binary, "app");
        assert_eq!(report.assets_processed, 1);
        assert_eq!(report.entries, 1);
        assert_eq!(report.stages.len(), 8);
        assert!(report.image.is_file());
        assert_eq!(report.kept_scratch_dir, None);
        assert!(!work.path().join("scratch").exists());
    }

    #[test]
    fn keeps_scratch_dir_when_asked() {
        let work = TempDir::new().unwrap();
        let config = StagingConfig {
            keep_tmp_dir: true,
            ..config_in(&work)
        };
        let mut backend = FakeBackend::default();

        let report = pipeline().run(&mut backend, &config).unwrap();

        let scratch = work.path().join("scratch");
        assert_eq!(report.kept_scratch_dir, Some(scratch.clone()));
        assert_eq!(
            fs::read(scratch.join("aci/rootfs/app")).unwrap(),
            b"\x7fELF app"
        );
    }

    #[test]
    fn user_assets_and_placeholders_are_staged() {
        let work = TempDir::new().unwrap();
        let host = work.path().join("host.conf");
        fs::write(&host, b"port = 80").unwrap();
        let config = StagingConfig {
            keep_tmp_dir: true,
            assets: vec![
                asset_string("/etc/app.conf", &host),
                "/bin/app-copy:<OUT>/app".to_string(),
            ],
            ..config_in(&work)
        };
        let mut backend = FakeBackend::default();

        let report = pipeline().run(&mut backend, &config).unwrap();

        let rootfs = work.path().join("scratch/aci/rootfs");
        assert_eq!(report.assets_processed, 3);
        assert_eq!(fs::read(rootfs.join("etc/app.conf")).unwrap(), b"port = 80");
        assert!(rootfs.join("bin/app-copy").is_file());
        assert!(rootfs.join("app").is_file());
    }

    #[test]
    fn failure_after_allocation_removes_scratch_dir() {
        let work = TempDir::new().unwrap();
        let config = StagingConfig {
            assets: vec!["/only/one/path".to_string()],
            ..config_in(&work)
        };
        let mut backend = FakeBackend::default();

        let err = pipeline().run(&mut backend, &config).unwrap_err();

        assert!(err.to_string().contains("copy assets"));
        assert!(err.chain().any(|cause| cause.is::<AssetError>()));
        assert!(!work.path().join("scratch").exists());
        assert!(!work.path().join("app.aci").exists());
    }

    #[test]
    fn failed_build_removes_temporary_scratch_dir() {
        let work = TempDir::new().unwrap();
        let config = StagingConfig {
            tmp_dir: None,
            ..config_in(&work)
        };
        let mut backend = FakeBackend {
            fail_prepare: true,
            ..FakeBackend::default()
        };

        let err = pipeline().run(&mut backend, &config).unwrap_err();

        assert!(err.to_string().contains("prepare project"));
        let scratch = backend.scratch.unwrap();
        assert!(scratch
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("imgstage-fake"));
        assert!(!scratch.exists());
    }

    #[test]
    fn reuse_skips_build_and_refreshes_image_dir() {
        let work = TempDir::new().unwrap();
        let scratch = work.path().join("previous");
        fs::create_dir_all(scratch.join("out")).unwrap();
        fs::write(scratch.join("out/app"), b"\x7fELF old build").unwrap();
        fs::create_dir_all(scratch.join("aci/rootfs")).unwrap();
        fs::write(scratch.join("aci/rootfs/stale"), b"stale").unwrap();

        let config = StagingConfig {
            tmp_dir: None,
            reuse_tmp_dir: Some(scratch.clone()),
            keep_tmp_dir: true,
            ..config_in(&work)
        };
        let mut backend = FakeBackend::default();

        let report = pipeline().run(&mut backend, &config).unwrap();

        assert!(!backend.prepared);
        assert!(!report.stages.contains(&Stage::PrepareProject));
        assert!(report.stages.contains(&Stage::LocateBinary));
        assert!(!scratch.join("aci/rootfs/stale").exists());
        assert_eq!(
            fs::read(scratch.join("aci/rootfs/app")).unwrap(),
            b"\x7fELF old build"
        );
        assert_eq!(fs::read(scratch.join("out/app")).unwrap(), b"\x7fELF old build");
    }

    #[test]
    fn reused_scratch_dir_is_removed_without_keep() {
        let work = TempDir::new().unwrap();
        let scratch = work.path().join("previous");
        fs::create_dir_all(scratch.join("out")).unwrap();
        fs::write(scratch.join("out/app"), b"\x7fELF").unwrap();

        let config = StagingConfig {
            tmp_dir: None,
            reuse_tmp_dir: Some(scratch.clone()),
            ..config_in(&work)
        };
        pipeline().run(&mut FakeBackend::default(), &config).unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn invalid_configuration_touches_nothing() {
        let work = TempDir::new().unwrap();
        let reuse = work.path().join("reuse");
        fs::create_dir(&reuse).unwrap();
        let config = StagingConfig {
            reuse_tmp_dir: Some(reuse.clone()),
            ..config_in(&work)
        };
        let mut backend = FakeBackend::default();

        let err = pipeline().run(&mut backend, &config).unwrap_err();

        assert!(err.chain().any(|cause| cause.is::<ConfigError>()));
        assert!(backend.scratch.is_none());
        assert!(reuse.exists());
    }

    #[test]
    fn existing_explicit_tmp_dir_is_left_alone() {
        let work = TempDir::new().unwrap();
        let config = config_in(&work);
        let scratch = work.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        fs::write(scratch.join("precious"), b"x").unwrap();

        let err = pipeline()
            .run(&mut FakeBackend::default(), &config)
            .unwrap_err();

        assert!(err.to_string().contains("make directories"));
        assert!(scratch.join("precious").exists());
    }

    struct RecordingWriter {
        seen: Arc<std::sync::Mutex<Vec<(String, PathBuf, PathBuf)>>>,
    }

    impl ImageWriter for RecordingWriter {
        fn write_image(
            &self,
            manifest: &imgstage_common::ImageManifest,
            image_dir: &Path,
            output: &Path,
        ) -> Result<imgstage_common::WrittenImage, imgstage_common::CommonError> {
            self.seen.lock().unwrap().push((
                manifest.name.to_string(),
                image_dir.to_path_buf(),
                output.to_path_buf(),
            ));
            Ok(imgstage_common::WrittenImage {
                path: output.to_path_buf(),
                sha256: String::new(),
                entries: 0,
            })
        }
    }

    #[test]
    fn hands_image_dir_to_writer_with_default_file_name() {
        let work = TempDir::new().unwrap();
        let config = StagingConfig {
            output: None,
            keep_tmp_dir: true,
            ..StagingConfig::new("example.com/tools/...")
        };
        let config = StagingConfig {
            tmp_dir: Some(work.path().join("scratch")),
            ..config
        };
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let writer = RecordingWriter { seen: seen.clone() };

        let report = pipeline()
            .with_writer(Box::new(writer))
            .run(&mut FakeBackend::default(), &config)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(
                "example.com/tools".to_string(),
                work.path().join("scratch/aci"),
                PathBuf::from("tools.aci"),
            )]
        );
        assert_eq!(report.image, PathBuf::from("tools.aci"));
    }
}
