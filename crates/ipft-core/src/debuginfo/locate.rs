//! Locating kernel and module debug information on the host.
//!
//! The search follows the conventions distributions use for kernel debuginfo
//! packages. Every candidate path is joined onto each *search root*; by default
//! there is a single root, `/`, and the caller may replace the roots with a
//! colon separated list (handy for chroots and for tests).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::compress::Compression;
use crate::config::SourceConfig;
use crate::error::{IpftError, Result};

/// Split a colon separated search path into roots.
///
/// Empty elements are dropped; an empty (or all-empty) string yields `/`.
#[must_use]
pub fn search_roots(debuginfo_path: &str) -> Vec<PathBuf>
{
    let roots: Vec<PathBuf> = debuginfo_path
        .split(':')
        .filter(|element| !element.is_empty())
        .map(PathBuf::from)
        .collect();
    if roots.is_empty() {
        vec![PathBuf::from("/")]
    } else {
        roots
    }
}

/// Release of the kernel to search for.
///
/// ## Errors
///
/// Fails if no release was configured and the osrelease file cannot be read.
pub fn kernel_release(config: &SourceConfig) -> Result<String>
{
    if let Some(release) = &config.kernel_release {
        return Ok(release.clone());
    }
    let raw = fs::read_to_string(&config.osrelease).map_err(|err| {
        IpftError::SourceOpen(format!("cannot read kernel release from {}: {err}", config.osrelease.display()))
    })?;
    let release = raw.trim();
    if release.is_empty() {
        return Err(IpftError::SourceOpen(format!("{} is empty", config.osrelease.display())));
    }
    Ok(release.to_string())
}

/// Candidate locations of the kernel image relative to a search root.
fn kernel_candidates(release: &str) -> [PathBuf; 4]
{
    [
        PathBuf::from(format!("boot/vmlinux-{release}")),
        PathBuf::from(format!("lib/modules/{release}/vmlinux")),
        PathBuf::from(format!("usr/lib/debug/boot/vmlinux-{release}")),
        PathBuf::from(format!("usr/lib/debug/lib/modules/{release}/vmlinux")),
    ]
}

/// First existing kernel image under any of `roots`.
#[must_use]
pub fn find_kernel_image(roots: &[PathBuf], release: &str) -> Option<PathBuf>
{
    for root in roots {
        for candidate in kernel_candidates(release) {
            let path = root.join(candidate);
            trace!(path = %path.display(), "probing kernel image");
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}

/// Names of the loaded modules, in the order the kernel lists them.
///
/// ## Errors
///
/// Fails if the module list cannot be read.
pub fn loaded_modules(proc_modules: &Path) -> Result<Vec<String>>
{
    let content = fs::read_to_string(proc_modules)?;
    Ok(content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

/// Module names use `_` and `-` interchangeably.
#[must_use]
pub fn normalize_module_name(name: &str) -> String
{
    name.replace('-', "_")
}

/// Where a module's file lives and whether it is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleFile
{
    /// Uncompressed object that may carry debug info
    Object(PathBuf),
    /// Compressed module, inflated into memory before parsing
    Compressed
    {
        path: PathBuf,
        compression: Compression,
    },
}

/// Index of module files found under the search roots.
#[derive(Debug, Default)]
pub struct ModuleIndex
{
    files: HashMap<String, ModuleFile>,
}

impl ModuleIndex
{
    /// Walk `lib/modules/<release>` and `usr/lib/debug/lib/modules/<release>`
    /// below every root.
    ///
    /// Separate debug files (`.ko.debug`) are preferred over the modules
    /// themselves. Otherwise the first file found for a name wins.
    #[must_use]
    pub fn build(roots: &[PathBuf], release: &str) -> Self
    {
        let mut index = Self::default();
        for root in roots {
            index.scan_dir(&root.join(format!("usr/lib/debug/lib/modules/{release}")));
            index.scan_dir(&root.join(format!("lib/modules/{release}")));
        }
        index
    }

    /// Look a module up by its `/proc/modules` name.
    #[must_use]
    pub fn lookup(&self, module: &str) -> Option<&ModuleFile>
    {
        self.files.get(&normalize_module_name(module))
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.files.is_empty()
    }

    fn scan_dir(&mut self, dir: &Path)
    {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "cannot read module directory");
                return;
            }
        };

        for entry in entries.flatten() {
            // file_type() does not follow symlinks, which keeps us out of build/ and source/
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                self.scan_dir(&path);
            } else if file_type.is_file() {
                self.add_file(path);
            }
        }
    }

    fn add_file(&mut self, path: PathBuf)
    {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return;
        };

        if let Some(stem) = file_name.strip_suffix(".ko.debug") {
            // Debug files take precedence over anything found so far.
            let key = normalize_module_name(stem);
            if !matches!(self.files.get(&key), Some(ModuleFile::Object(existing)) if is_debug_file(existing)) {
                self.files.insert(key, ModuleFile::Object(path));
            }
        } else if let Some(stem) = file_name.strip_suffix(".ko") {
            self.files
                .entry(normalize_module_name(stem))
                .or_insert(ModuleFile::Object(path));
        } else if let Some((stem, compression)) = Compression::split_module_name(file_name) {
            let key = normalize_module_name(stem);
            self.files
                .entry(key)
                .or_insert(ModuleFile::Compressed { path, compression });
        }
    }
}

fn is_debug_file(path: &Path) -> bool
{
    path.to_str().is_some_and(|path| path.ends_with(".ko.debug"))
}
