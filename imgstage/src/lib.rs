pub mod asset;
pub mod backend;
pub mod command_runner;
pub mod config;
pub mod error;
pub mod image;
pub mod output;
pub mod pipeline;
pub mod placeholder;
pub mod platform;
pub mod vcs;

pub use asset::{AssetResolver, AssetSpec};
pub use backend::{Backend, CmakeBackend, CmakeOptions, GoBackend, GoOptions};
pub use command_runner::{CommandOptions, CommandRunner, RealCommandRunner};
pub use config::{StagingConfig, StagingPaths};
pub use error::{AssetError, BackendError, CommandError, ConfigError, ImageError};
pub use image::ManifestAssembler;
pub use pipeline::{Stage, StagingPipeline, StagingReport};
pub use placeholder::PlaceholderMapping;
pub use platform::Platform;
