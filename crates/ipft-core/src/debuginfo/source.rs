//! The scoped set of debug images the resolver walks.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::image::DebugImage;
use super::locate::{self, ModuleFile, ModuleIndex};
use super::DieRef;
use crate::config::SourceConfig;
use crate::error::{IpftError, Result};

/// Kernel image plus loaded modules, opened for one resolver run.
///
/// All section data and parsed units are owned here and released when the
/// source is dropped, whichever way the run ends.
#[derive(Debug)]
pub struct DebugInfoSource
{
    images: Vec<DebugImage>,
}

impl DebugInfoSource
{
    /// Locate and open the running kernel's debug information.
    ///
    /// The kernel image is mandatory; modules without usable debug info are
    /// skipped.
    ///
    /// ## Errors
    ///
    /// [`IpftError::SourceOpen`] when the kernel image cannot be found or has
    /// no debug info.
    pub fn open(config: &SourceConfig) -> Result<Self>
    {
        let roots = locate::search_roots(&config.debuginfo_path);

        let (kernel_path, release) = match &config.vmlinux {
            Some(path) => (path.clone(), locate::kernel_release(config).ok()),
            None => {
                let release = locate::kernel_release(config)?;
                let path = locate::find_kernel_image(&roots, &release).ok_or_else(|| {
                    IpftError::SourceOpen(format!(
                        "no vmlinux for kernel {release} under {}",
                        roots.iter().map(|root| root.display().to_string()).collect::<Vec<_>>().join(":")
                    ))
                })?;
                (path, Some(release))
            }
        };

        info!(path = %kernel_path.display(), "loading kernel debug info");
        let kernel = DebugImage::load(&kernel_path, "vmlinux")
            .map_err(|err| IpftError::SourceOpen(format!("{}: {err}", kernel_path.display())))?;
        info!(units = kernel.unit_count(), "kernel debug info loaded");
        let mut images = vec![kernel];

        if config.modules {
            match &release {
                Some(release) => images.extend(Self::open_modules(config, &roots, release)),
                None => debug!("kernel release unknown, not loading modules"),
            }
        }

        Ok(Self::from_images(images))
    }

    fn open_modules(config: &SourceConfig, roots: &[PathBuf], release: &str) -> Vec<DebugImage>
    {
        let names = match locate::loaded_modules(&config.proc_modules) {
            Ok(names) => names,
            Err(err) => {
                warn!(path = %config.proc_modules.display(), error = %err, "cannot list loaded modules");
                return Vec::new();
            }
        };

        let index = ModuleIndex::build(roots, release);
        let mut images = Vec::new();
        for name in names {
            match index.lookup(&name) {
                Some(file) => match Self::load_module(file, &name) {
                    Ok(image) => images.push(image),
                    Err(err) => debug!(module = %name, error = %err, "skipping module"),
                },
                None => debug!(module = %name, "no module file found"),
            }
        }
        info!(modules = images.len(), "loaded module debug info");
        images
    }

    fn load_module(file: &ModuleFile, name: &str) -> Result<DebugImage>
    {
        match file {
            ModuleFile::Object(path) => DebugImage::load(path, name),
            ModuleFile::Compressed { path, compression } => {
                let bytes = compression.decompress(path)?;
                debug!(module = %name, ?compression, size = bytes.len(), "inflated module");
                DebugImage::from_elf(&bytes, name, path)
            }
        }
    }

    /// Wrap already loaded images; the first one is treated as the kernel.
    #[must_use]
    pub fn from_images(images: Vec<DebugImage>) -> Self
    {
        Self { images }
    }

    #[must_use]
    pub fn images(&self) -> &[DebugImage]
    {
        &self.images
    }

    /// Every compilation unit, kernel first, then modules in load order.
    pub fn compilation_units(&self) -> impl Iterator<Item = CompilationUnit<'_>>
    {
        self.images.iter().flat_map(|image| {
            image
                .compilation_unit_indices()
                .map(move |index| CompilationUnit { image, index })
        })
    }
}

impl Drop for DebugInfoSource
{
    fn drop(&mut self)
    {
        debug!(images = self.images.len(), "releasing debug info");
    }
}

/// One compilation unit of one image.
#[derive(Debug, Clone, Copy)]
pub struct CompilationUnit<'a>
{
    image: &'a DebugImage,
    index: usize,
}

impl<'a> CompilationUnit<'a>
{
    #[must_use]
    pub fn image(&self) -> &'a DebugImage
    {
        self.image
    }

    #[must_use]
    pub fn index(&self) -> usize
    {
        self.index
    }

    /// Root DIE (`DW_TAG_compile_unit` or `DW_TAG_partial_unit`).
    ///
    /// ## Errors
    ///
    /// Fails if the unit cannot be parsed.
    pub fn root(&self) -> Result<DieRef>
    {
        self.image.unit_root(self.index)
    }
}
