//! Go projects, built with a static `go get` into a private GOPATH.

use super::{select_binary, Backend};
use crate::asset::asset_string;
use crate::command_runner::{run_checked, CommandOptions, CommandRunner};
use crate::config::{StagingConfig, StagingPaths};
use crate::error::{BackendError, ConfigError};
use crate::image::strip_any_binary_suffix;
use crate::placeholder::PlaceholderMapping;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct GoOptions {
    /// Go toolchain to run.
    pub go_binary: String,
    /// GOPATH to build in; a `gopath` directory in the scratch dir otherwise.
    pub go_path: Option<PathBuf>,
}

impl Default for GoOptions {
    fn default() -> Self {
        Self {
            go_binary: "go".to_string(),
            go_path: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GoPaths {
    /// GOPATH the sources are fetched into.
    go_path: PathBuf,
    /// `<scratch>/gopath`, always private to the run.
    scratch_go_path: PathBuf,
    go_bin: PathBuf,
    project: PathBuf,
    go_root: Option<String>,
}

pub struct GoBackend {
    options: GoOptions,
    paths: GoPaths,
    binary: Option<String>,
}

impl GoBackend {
    pub fn new(options: GoOptions) -> Self {
        Self {
            options,
            paths: GoPaths::default(),
            binary: None,
        }
    }

    fn build_options(&self) -> CommandOptions {
        let mut options = CommandOptions::default()
            .clear_env()
            .env("GOPATH", self.paths.go_path.to_string_lossy())
            .env("GOBIN", self.paths.go_bin.to_string_lossy())
            .env("CGO_ENABLED", "0")
            .env("PATH", std::env::var("PATH").unwrap_or_default());
        if let Some(go_root) = &self.paths.go_root {
            options = options.env("GOROOT", go_root.as_str());
        }
        options
    }
}

impl Backend for GoBackend {
    fn name(&self) -> &'static str {
        "go"
    }

    fn placeholder_mapping(&self) -> PlaceholderMapping {
        PlaceholderMapping::new()
            .with("<GOPATH>", &self.paths.go_path)
            .with("<PROJPATH>", &self.paths.project)
    }

    fn validate(&self, _config: &StagingConfig) -> Result<(), ConfigError> {
        if self.options.go_binary.is_empty() {
            return Err(ConfigError::EmptyOption("--go-binary"));
        }
        if let Some(go_path) = &self.options.go_path {
            if go_path.exists() && !go_path.is_dir() {
                return Err(ConfigError::InvalidDirectory {
                    option: "--go-path",
                    path: go_path.clone(),
                });
            }
        }
        Ok(())
    }

    fn setup_paths(
        &mut self,
        paths: &StagingPaths,
        config: &StagingConfig,
    ) -> Result<(), BackendError> {
        let scratch_go_path = paths.scratch.join("gopath");
        let go_path = self
            .options
            .go_path
            .clone()
            .unwrap_or_else(|| scratch_go_path.clone());

        if std::env::var_os("GOPATH").is_some() {
            tracing::warn!("GOPATH env var is ignored, use --go-path=\"$GOPATH\" instead");
        }
        let go_root = std::env::var("GOROOT").ok().filter(|root| !root.is_empty());
        if let Some(go_root) = &go_root {
            tracing::warn!(go_root = %go_root, "overriding GOROOT for the build");
        }

        // Import paths always use '/', whatever the host separator.
        let project = strip_any_binary_suffix(&config.project)
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(go_path.join("src"), |path, part| path.join(part));

        self.paths = GoPaths {
            go_bin: scratch_go_path.join("bin"),
            go_path,
            scratch_go_path,
            project,
            go_root,
        };
        Ok(())
    }

    fn directories_to_make(&self) -> Vec<PathBuf> {
        vec![
            self.paths.scratch_go_path.clone(),
            self.paths.go_bin.clone(),
        ]
    }

    fn prepare_project(
        &mut self,
        runner: &dyn CommandRunner,
        config: &StagingConfig,
    ) -> Result<(), BackendError> {
        let args = [
            "get",
            "-a",
            "-tags",
            "netgo",
            "-ldflags",
            "-w",
            "-installsuffix",
            "nocgo",
            config.project.as_str(),
        ];
        let options = self.build_options();
        tracing::debug!(env = ?options.env, "go build environment");
        run_checked(runner, &self.options.go_binary, &args, &options)?;
        Ok(())
    }

    fn locate_binary(&mut self, config: &StagingConfig) -> Result<(), BackendError> {
        self.binary = Some(select_binary(
            &self.paths.go_bin,
            config.use_binary.as_deref(),
        )?);
        Ok(())
    }

    fn assets(&self, image_bin_dir: &Path) -> Result<Vec<String>, BackendError> {
        let binary = self.binary.as_ref().ok_or(BackendError::BinaryNotLocated)?;
        Ok(vec![asset_string(
            image_bin_dir.join(binary),
            self.paths.go_bin.join(binary),
        )])
    }

    fn binary_name(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    fn repo_path(&self) -> Option<PathBuf> {
        Some(self.paths.project.clone())
    }
}
