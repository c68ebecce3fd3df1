//! # Debug-Info Source
//!
//! Everything needed to get from "the running kernel" to a set of DWARF
//! compilation units the resolver can walk:
//!
//! - [`locate`]: find `vmlinux` and the `.ko` files of loaded modules
//! - [`compress`]: inflate `.ko.xz` / `.ko.zst` / `.ko.gz` modules
//! - [`image`]: parse one ELF object, relocate and expose its DIE tree
//! - [`source`]: the scoped collection of images handed to the resolver
//!
//! DIEs are addressed through [`DieRef`] handles. A handle is only meaningful
//! together with the [`DebugImage`] that produced it.

use std::fmt;

use gimli::{EndianArcSlice, RunTimeEndian, UnitOffset};

pub mod compress;
pub mod image;
pub mod locate;
pub mod source;

pub use compress::Compression;
pub use image::DebugImage;
pub use source::{CompilationUnit, DebugInfoSource};

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = gimli::Dwarf<OwnedReader>;
pub(crate) type OwnedUnit = gimli::Unit<OwnedReader>;

/// Handle naming one DIE inside a [`DebugImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DieRef
{
    pub(crate) unit: usize,
    pub(crate) offset: UnitOffset<usize>,
}

impl DieRef
{
    pub(crate) fn new(unit: usize, offset: UnitOffset<usize>) -> Self
    {
        Self { unit, offset }
    }
}

impl fmt::Display for DieRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "unit#{}+{:#x}", self.unit, self.offset.0)
    }
}
