//! Image naming and manifest assembly.

use crate::backend::Backend;
use crate::command_runner::CommandRunner;
use crate::config::StagingConfig;
use crate::error::ImageError;
use crate::platform::Platform;
use crate::vcs;
use imgstage_common::archive::IMAGE_EXTENSION;
use imgstage_common::{AcName, App, ImageManifest, Label};
use std::path::Path;

/// Project suffix meaning "any binary built under this path".
pub const ANY_BINARY_SUFFIX: &str = "/...";

/// `project` without a trailing `/...`.
pub fn strip_any_binary_suffix(project: &str) -> &str {
    project.strip_suffix(ANY_BINARY_SUFFIX).unwrap_or(project)
}

fn with_binary_suffix(project: &str, base: String, use_binary: Option<&str>) -> String {
    match use_binary {
        Some(binary) if project.ends_with(ANY_BINARY_SUFFIX) => format!("{base}-{binary}"),
        _ => base,
    }
}

/// Image name for `project`.
///
/// `example.com/tools/...` built with `--use-binary lint` becomes
/// `example.com/tools-lint`; anything else is used verbatim.
pub fn image_name(project: &str, use_binary: Option<&str>) -> String {
    let base = strip_any_binary_suffix(project).to_string();
    with_binary_suffix(project, base, use_binary)
}

/// File name of the image artifact, e.g. `tools-lint.aci`.
pub fn image_file_name(project: &str, use_binary: Option<&str>) -> String {
    let stripped = strip_any_binary_suffix(project);
    let base = Path::new(stripped)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| stripped.to_string());
    format!(
        "{}{IMAGE_EXTENSION}",
        with_binary_suffix(project, base, use_binary)
    )
}

/// Builds the manifest for a staged image.
pub struct ManifestAssembler<'a> {
    runner: &'a dyn CommandRunner,
    platform: Platform,
}

impl<'a> ManifestAssembler<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn assemble(
        &self,
        backend: &dyn Backend,
        config: &StagingConfig,
    ) -> Result<ImageManifest, ImageError> {
        let name = AcName::new(backend.image_name(config)).map_err(ImageError::InvalidName)?;
        let binary = backend.binary_name().ok_or(ImageError::MissingBinary)?;

        let mut manifest = ImageManifest::blank(name);
        manifest.app = Some(App {
            exec: entrypoint(binary, &config.exec),
            user: "0".to_string(),
            group: "0".to_string(),
        });
        manifest.labels = self.labels(backend);
        Ok(manifest)
    }

    fn labels(&self, backend: &dyn Backend) -> Vec<Label> {
        let mut labels = Vec::new();
        for (name, value) in [
            ("arch", self.platform.arch.as_label()),
            ("os", self.platform.os.as_label()),
        ] {
            match Label::new(name, value) {
                Ok(label) => labels.push(label),
                Err(err) => tracing::warn!(%err, "dropping label"),
            }
        }
        if let Some(label) = self.vcs_label(backend) {
            labels.push(label);
        }
        labels
    }

    /// A missing or broken VCS never fails the build; the label is just left out.
    fn vcs_label(&self, backend: &dyn Backend) -> Option<Label> {
        let repo = backend.repo_path()?;
        let info = match vcs::describe(self.runner, &repo) {
            Ok(Some(info)) => info,
            Ok(None) => {
                tracing::debug!(repo = %repo.display(), "project is not under version control");
                return None;
            }
            Err(err) => {
                tracing::warn!(%err, repo = %repo.display(), "failed to get vcs info");
                return None;
            }
        };
        match Label::new(info.kind.as_str(), info.revision) {
            Ok(label) => Some(label),
            Err(err) => {
                tracing::warn!(%err, "invalid vcs label");
                None
            }
        }
    }
}

fn entrypoint(binary: &str, args: &[String]) -> Vec<String> {
    std::iter::once(format!("/{binary}"))
        .chain(args.iter().cloned())
        .collect()
}
