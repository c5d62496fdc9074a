//! Image artifact writer.
//!
//! An image artifact is a gzip-compressed tar holding a `manifest` JSON entry
//! followed by the staged `rootfs/` tree. Every entry is owned by uid/gid 0
//! regardless of who ran the build.

use crate::checksum::sha256_file;
use crate::error::CommonError;
use crate::manifest::ImageManifest;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};

/// Name of the manifest entry inside the artifact.
pub const MANIFEST_ENTRY: &str = "manifest";

/// Name of the root filesystem directory inside the image directory.
pub const ROOTFS_DIR: &str = "rootfs";

/// File extension of image artifacts.
pub const IMAGE_EXTENSION: &str = ".aci";

/// Result of writing an image artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    pub path: PathBuf,
    pub sha256: String,
    /// Number of filesystem entries stored under `rootfs/`.
    pub entries: usize,
}

/// Turns a manifest and a staged image directory into a single artifact.
pub trait ImageWriter {
    fn write_image(
        &self,
        manifest: &ImageManifest,
        image_dir: &Path,
        output: &Path,
    ) -> Result<WrittenImage, CommonError>;
}

/// Writes `.aci` artifacts (tar + gzip).
#[derive(Debug, Clone, Copy, Default)]
pub struct AciWriter;

impl AciWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ImageWriter for AciWriter {
    fn write_image(
        &self,
        manifest: &ImageManifest,
        image_dir: &Path,
        output: &Path,
    ) -> Result<WrittenImage, CommonError> {
        let rootfs = image_dir.join(ROOTFS_DIR);
        if !rootfs.is_dir() {
            return Err(CommonError::Archive(format!(
                "image directory {} has no {ROOTFS_DIR} directory",
                image_dir.display()
            )));
        }

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(output)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);
        builder.follow_symlinks(false);

        let manifest_json = manifest.to_json()?;
        append_manifest(&mut builder, manifest_json.as_bytes())?;

        let mut entries = 0;
        append_tree(&mut builder, &rootfs, Path::new(ROOTFS_DIR), &mut entries)?;

        let encoder = builder
            .into_inner()
            .map_err(|err| CommonError::Archive(err.to_string()))?;
        let mut file = encoder.finish()?;
        file.flush()?;

        Ok(WrittenImage {
            path: output.to_path_buf(),
            sha256: sha256_file(output)?,
            entries,
        })
    }
}

fn root_owned_header(entry_type: EntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

fn append_manifest<W: Write>(builder: &mut Builder<W>, content: &[u8]) -> Result<(), CommonError> {
    let mut header = root_owned_header(EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    builder
        .append_data(&mut header, MANIFEST_ENTRY, content)
        .map_err(|err| CommonError::Archive(format!("failed to add manifest: {err}")))
}

/// Recursively add `dir` to the archive under `archive_path`. Entries are
/// visited in name order so artifacts are reproducible.
fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    archive_path: &Path,
    entries: &mut usize,
) -> Result<(), CommonError> {
    let metadata = fs::symlink_metadata(dir)?;
    let mut header = root_owned_header(EntryType::Directory);
    header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
    normalize_header(&mut header)?;
    header.set_size(0);
    builder
        .append_data(&mut header, archive_path, io::empty())
        .map_err(|err| archive_error(archive_path, err))?;

    let mut children: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        let child_archive_path = archive_path.join(child.file_name());
        let metadata = fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();
        *entries += 1;

        if file_type.is_dir() {
            append_tree(builder, &path, &child_archive_path, entries)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            let mut header = root_owned_header(EntryType::Symlink);
            header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
            normalize_header(&mut header)?;
            header.set_size(0);
            builder
                .append_link(&mut header, &child_archive_path, &target)
                .map_err(|err| archive_error(&child_archive_path, err))?;
        } else if file_type.is_file() {
            let mut header = root_owned_header(EntryType::Regular);
            header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
            normalize_header(&mut header)?;
            let file = File::open(&path)?;
            builder
                .append_data(&mut header, &child_archive_path, file)
                .map_err(|err| archive_error(&child_archive_path, err))?;
        } else {
            return Err(CommonError::Archive(format!(
                "unsupported node {} in image directory",
                path.display()
            )));
        }
    }

    Ok(())
}

/// Strip host-specific metadata copied in by `set_metadata_in_mode`; only the
/// permission bits survive.
fn normalize_header(header: &mut Header) -> Result<(), CommonError> {
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    // GNU headers carry names too; blank them so the builder's account does not leak.
    header.set_username("")?;
    header.set_groupname("")?;
    Ok(())
}

fn archive_error(path: &Path, err: io::Error) -> CommonError {
    CommonError::Archive(format!("failed to add {}: {err}", path.display()))
}
