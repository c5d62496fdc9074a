pub mod archive;
pub mod checksum;
pub mod error;
pub mod manifest;

pub use archive::{AciWriter, ImageWriter, WrittenImage};
pub use error::CommonError;
pub use manifest::{AcName, App, ImageManifest, Label};
