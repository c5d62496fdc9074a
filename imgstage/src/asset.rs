//! Asset staging and runtime dependency discovery.
//!
//! An asset pairs a path inside the image with a path on the build host,
//! written as `<image path><SEP><local path>` where `<SEP>` is the host
//! path-list separator (`:` on unix). [`AssetResolver`] copies every asset into
//! the image root filesystem and keeps going until nothing new turns up:
//! shared libraries reported by the dependency lister, interpreters named in
//! `#!` lines, every hop of the symlink chains leading to both, and the glibc
//! name-service libraries next to `libc`.

use crate::command_runner::{CommandOptions, CommandRunner};
use crate::error::{AssetError, CommandError};
use crate::placeholder::PlaceholderMapping;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Separator between the image half and the local half of an asset spec.
#[cfg(windows)]
pub const LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const LIST_SEPARATOR: char = ':';

/// Longest symlink chain followed before assuming a cycle.
pub const MAX_SYMLINK_HOPS: usize = 100;

/// Program used to list shared library dependencies unless overridden.
pub const DEFAULT_DEPENDENCY_LISTER: &str = "ldd";

/// Format an asset spec string.
pub fn asset_string(image_path: impl AsRef<Path>, local_path: impl AsRef<Path>) -> String {
    format!(
        "{}{}{}",
        image_path.as_ref().display(),
        LIST_SEPARATOR,
        local_path.as_ref().display()
    )
}

/// An asset mapped to the same path inside the image as on the host.
pub fn self_mapped(path: impl AsRef<Path>) -> String {
    asset_string(&path, &path)
}

/// The two halves of an asset spec, after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub image_path: PathBuf,
    pub local_path: PathBuf,
}

impl AssetSpec {
    /// Split a raw spec and substitute placeholders in both halves.
    ///
    /// Only the shape is checked here; no filesystem access happens.
    pub fn parse(spec: &str, mapping: &PlaceholderMapping) -> Result<Self, AssetError> {
        let halves: Vec<&str> = spec.split(LIST_SEPARATOR).collect();
        let [image, local] = halves.as_slice() else {
            return Err(AssetError::Malformed {
                spec: spec.to_string(),
                separator: LIST_SEPARATOR,
            });
        };

        let image = mapping.substitute(image);
        let local = mapping.substitute(local);
        if !Path::new(&image).is_absolute() {
            return Err(AssetError::NotAbsolute {
                kind: "image",
                path: image,
            });
        }
        if !Path::new(&local).is_absolute() {
            return Err(AssetError::NotAbsolute {
                kind: "local",
                path: local,
            });
        }

        Ok(Self {
            image_path: PathBuf::from(image),
            local_path: PathBuf::from(local),
        })
    }

    /// Where this asset lands under `rootfs`.
    pub fn destination(&self, rootfs: &Path) -> PathBuf {
        under_root(rootfs, &self.image_path)
    }
}

fn under_root(rootfs: &Path, image_path: &Path) -> PathBuf {
    let relative: PathBuf = image_path
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    rootfs.join(relative)
}

/// Copies assets into an image root filesystem together with everything they
/// need at runtime.
pub struct AssetResolver<'a> {
    runner: &'a dyn CommandRunner,
    lister: String,
}

impl<'a> AssetResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            lister: DEFAULT_DEPENDENCY_LISTER.to_string(),
        }
    }

    /// Use a different dependency lister than `ldd`.
    pub fn with_lister(mut self, program: impl Into<String>) -> Self {
        self.lister = program.into();
        self
    }

    /// Copy `specs` and their dependency closure into `rootfs`.
    ///
    /// Each raw spec string is processed at most once, which is what makes the
    /// loop terminate when libraries depend on each other. Returns the number
    /// of specs processed. The first error aborts the whole run.
    pub fn resolve_and_copy(
        &self,
        specs: &[String],
        rootfs: &Path,
        mapping: &PlaceholderMapping,
        excludes: &[String],
    ) -> Result<usize, AssetError> {
        let excludes: HashSet<PathBuf> = excludes
            .iter()
            .map(|raw| PathBuf::from(mapping.substitute(raw)))
            .collect();

        let mut worklist: VecDeque<String> = specs.iter().cloned().collect();
        let mut processed: HashSet<String> = HashSet::new();

        while let Some(spec) = worklist.pop_front() {
            if processed.contains(&spec) {
                tracing::trace!(%spec, "asset already processed");
                continue;
            }
            tracing::debug!(%spec, "processing asset");
            let discovered = self.process_one(&spec, rootfs, mapping, &excludes)?;
            processed.insert(spec);
            worklist.extend(discovered);
        }

        tracing::info!(count = processed.len(), rootfs = %rootfs.display(), "assets staged");
        Ok(processed.len())
    }

    fn process_one(
        &self,
        spec: &str,
        rootfs: &Path,
        mapping: &PlaceholderMapping,
        excludes: &HashSet<PathBuf>,
    ) -> Result<Vec<String>, AssetError> {
        let asset = AssetSpec::parse(spec, mapping)?;
        validate_local(&asset.local_path)?;

        let destination = asset.destination(rootfs);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| AssetError::Copy {
                from: asset.local_path.clone(),
                to: parent.to_path_buf(),
                source,
            })?;
        }

        let mut discovered = Vec::new();
        self.copy_node(&asset.local_path, &destination, excludes, &mut discovered)?;
        Ok(discovered)
    }

    /// Depth-first, pre-order copy of `src` to `dest`.
    fn copy_node(
        &self,
        src: &Path,
        dest: &Path,
        excludes: &HashSet<PathBuf>,
        discovered: &mut Vec<String>,
    ) -> Result<(), AssetError> {
        if excludes.contains(src) {
            tracing::debug!(path = %src.display(), "excluded");
            return Ok(());
        }

        let metadata = fs::symlink_metadata(src).map_err(|source| AssetError::Stat {
            path: src.to_path_buf(),
            source,
        })?;
        let file_type = metadata.file_type();
        let copy_error = |source| AssetError::Copy {
            from: src.to_path_buf(),
            to: dest.to_path_buf(),
            source,
        };

        if file_type.is_dir() {
            if !dest.is_dir() {
                fs::create_dir(dest).map_err(copy_error)?;
            }
            let mut children = fs::read_dir(src)
                .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
                .map_err(|source| AssetError::Read {
                    path: src.to_path_buf(),
                    source,
                })?;
            children.sort_by_key(|entry| entry.file_name());
            for child in children {
                let name = child.file_name();
                self.copy_node(&src.join(&name), &dest.join(&name), excludes, discovered)?;
            }
            // Applied after the children so read-only directories can still be filled.
            fs::set_permissions(dest, metadata.permissions()).map_err(copy_error)?;
        } else if file_type.is_file() {
            fs::copy(src, dest).map_err(copy_error)?;
            fs::set_permissions(dest, metadata.permissions()).map_err(copy_error)?;
            discovered.extend(self.dependencies_of(src)?);
        } else if file_type.is_symlink() {
            copy_symlink(src, dest).map_err(copy_error)?;
        } else {
            return Err(AssetError::UnsupportedNode {
                path: src.to_path_buf(),
                kind: describe_file_type(&metadata),
            });
        }

        Ok(())
    }

    /// Assets a copied regular file needs at runtime.
    pub fn dependencies_of(&self, path: &Path) -> Result<Vec<String>, AssetError> {
        let mut assets = self.shared_libraries(path)?;
        assets.extend(interpreter_assets(path)?);
        assets.extend(name_service_libraries(path));
        Ok(assets)
    }

    fn shared_libraries(&self, path: &Path) -> Result<Vec<String>, AssetError> {
        let path_arg = path.to_string_lossy();
        let output = match self
            .runner
            .run_output(&self.lister, &[path_arg.as_ref()], &CommandOptions::default())
        {
            Ok(output) => output,
            Err(CommandError::NotFound { program }) => {
                return Err(AssetError::ListerMissing { program })
            }
            Err(source) => {
                return Err(AssetError::Lister {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        // Non-zero usually means "not a dynamic executable".
        if !output.status.success() {
            tracing::trace!(path = %path.display(), "no shared library dependencies");
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut assets = Vec::new();
        for library in parse_library_paths(&stdout) {
            assets.extend(chase_symlinks(&library)?);
        }
        Ok(assets)
    }
}

fn validate_local(path: &Path) -> Result<(), AssetError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| AssetError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let file_type = metadata.file_type();
    if file_type.is_dir() || file_type.is_file() || file_type.is_symlink() {
        Ok(())
    } else {
        Err(AssetError::UnsupportedNode {
            path: path.to_path_buf(),
            kind: describe_file_type(&metadata),
        })
    }
}

#[cfg(unix)]
fn describe_file_type(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::FileTypeExt;

    let file_type = metadata.file_type();
    let kind = if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else {
        "unknown node"
    };
    kind.to_string()
}

#[cfg(not(unix))]
fn describe_file_type(_metadata: &fs::Metadata) -> String {
    "unknown node".to_string()
}

/// Recreate the link at `dest` with the same, unresolved, target.
fn copy_symlink(src: &Path, dest: &Path) -> std::io::Result<()> {
    let target = fs::read_link(src)?;
    match fs::read_link(dest) {
        Ok(existing) if existing == target => return Ok(()),
        Ok(_) => fs::remove_file(dest)?,
        Err(_) => {}
    }
    create_symlink(&target, dest)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

fn library_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"(?m)^\t(?:\S+\s+=>\s+)?(\S+)\s+\([0-9a-fA-Fx]+\)$")
            .expect("library line pattern is valid")
    })
}

/// Extract library paths from `ldd` output.
///
/// Lines without an absolute path, like the vDSO or `=> not found`, are
/// skipped.
pub fn parse_library_paths(output: &str) -> Vec<PathBuf> {
    library_line()
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .map(|path| PathBuf::from(path.as_str()))
        .filter(|path| path.is_absolute())
        .collect()
}

/// Interpreter assets for a `#!` script; empty for anything else.
pub fn interpreter_assets(path: &Path) -> Result<Vec<String>, AssetError> {
    let read_error = |source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_error)?;
    let mut reader = BufReader::with_capacity(256, file);

    let mut marker = [0u8; 2];
    match reader.read_exact(&mut marker) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(Vec::new()),
        Err(err) => return Err(read_error(err)),
    }
    if &marker != b"#!" {
        return Ok(Vec::new());
    }

    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).map_err(read_error)?;
    let line = String::from_utf8_lossy(&line);
    let Some(interpreter) = line.split_whitespace().next() else {
        return Ok(Vec::new());
    };
    tracing::debug!(script = %path.display(), interpreter, "found interpreter");
    chase_symlinks(Path::new(interpreter))
}

/// glibc loads its `libnss_*` modules at runtime without them showing up as
/// linked dependencies, so they ride along with `libc.*`.
pub fn name_service_libraries(path: &Path) -> Vec<String> {
    let is_libc = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            glob::Pattern::new("libc.*")
                .map(|pattern| pattern.matches(name))
                .unwrap_or(false)
        });
    if !is_libc {
        return Vec::new();
    }

    let Some(dir) = path.parent() else {
        return Vec::new();
    };
    let pattern = dir.join("libnss_*");
    let Ok(matches) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };
    matches.flatten().map(self_mapped).collect()
}

/// Self-mapped assets for `start` and every link it leads through.
///
/// Stops at the first path that is not a symlink or does not exist yet (it may
/// be produced by a later copy). A chain of N links yields N + 1 assets;
/// more than [`MAX_SYMLINK_HOPS`] links is treated as a cycle.
pub fn chase_symlinks(start: &Path) -> Result<Vec<String>, AssetError> {
    let mut assets = Vec::new();
    let mut path = start.to_path_buf();
    let mut hops = 0;

    loop {
        assets.push(self_mapped(&path));
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(source) => return Err(AssetError::Stat { path, source }),
        };
        if !metadata.file_type().is_symlink() {
            break;
        }
        if hops == MAX_SYMLINK_HOPS {
            return Err(AssetError::SymlinkLoop {
                start: start.to_path_buf(),
                max: MAX_SYMLINK_HOPS,
            });
        }

        let target = fs::read_link(&path).map_err(|source| AssetError::Read {
            path: path.clone(),
            source,
        })?;
        path = if target.is_absolute() {
            clean_path(&target)
        } else {
            let dir = path.parent().unwrap_or_else(|| Path::new("/"));
            clean_path(&dir.join(target))
        };
        hops += 1;
    }

    Ok(assets)
}

/// Lexically normalize a path: drop `.`, fold `..` into its parent.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}
