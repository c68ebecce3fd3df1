//! Object file parsing and DIE access for one kernel image or module.
//!
//! DWARF sections are copied out of the ELF file (decompressing if needed)
//! into `Arc<[u8]>` blobs and read through `EndianArcSlice`, so a
//! [`DebugImage`] owns everything it hands out and does not borrow the file.
//!
//! Kernel modules are relocatable objects: their `.debug_*` sections refer to
//! each other through relocations that must be applied before gimli can make
//! sense of string and unit offsets.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebugInfoOffset, DebugTypeSignature, DebuggingInformationEntry, DwAt, DwTag,
    EndianArcSlice, Endianity, Reader, RunTimeEndian, SectionId, UnitHeader, UnitOffset, UnitSectionOffset, UnitType,
};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol, RelocationKind, RelocationTarget};
use once_cell::unsync::OnceCell;
use tracing::{trace, warn};

use super::{DieRef, OwnedDwarf, OwnedReader, OwnedUnit};
use crate::error::{map_dwarf_error, IpftError, Result};

const DWARF_SECTIONS: &[SectionId] = &[
    SectionId::DebugAbbrev,
    SectionId::DebugAddr,
    SectionId::DebugInfo,
    SectionId::DebugLine,
    SectionId::DebugLineStr,
    SectionId::DebugRanges,
    SectionId::DebugRngLists,
    SectionId::DebugStr,
    SectionId::DebugStrOffsets,
    SectionId::DebugTypes,
    SectionId::DebugLoc,
    SectionId::DebugLocLists,
];

struct UnitSlot
{
    header: UnitHeader<OwnedReader>,
    parsed: OnceCell<OwnedUnit>,
}

/// Parsed DWARF of a single object file.
///
/// Unit headers are enumerated when the image is built; the units themselves
/// are parsed on first access and cached.
pub struct DebugImage
{
    name: String,
    path: Option<PathBuf>,
    dwarf: OwnedDwarf,
    units: Vec<UnitSlot>,
}

impl fmt::Debug for DebugImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DebugImage")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

impl DebugImage
{
    /// Load the DWARF of the ELF object at `path`.
    ///
    /// ## Errors
    ///
    /// - [`IpftError::NoDebugInfo`] if the file has no `.debug_info`
    /// - [`IpftError::Object`] if the ELF or its relocations are malformed
    /// - [`IpftError::Io`] if the file cannot be read
    pub fn load(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Self::from_elf(&bytes, name, path)
    }

    /// Parse an ELF object already in memory, e.g. a decompressed module.
    ///
    /// `path` is only recorded for diagnostics.
    ///
    /// ## Errors
    ///
    /// See [`DebugImage::load`].
    pub fn from_elf(bytes: &[u8], name: impl Into<String>, path: &Path) -> Result<Self>
    {
        let file = object::File::parse(bytes).map_err(|err| object_error(format!("parsing {}", path.display()), err))?;

        if file.section_by_name(SectionId::DebugInfo.name()).is_none() {
            return Err(IpftError::NoDebugInfo(path.to_path_buf()));
        }

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let relocatable = file.kind() == ObjectKind::Relocatable;

        let mut sections = HashMap::new();
        for id in DWARF_SECTIONS {
            let Some(section) = file.section_by_name(id.name()) else {
                continue;
            };
            let mut data = section
                .uncompressed_data()
                .map_err(|err| object_error(format!("reading {}", id.name()), err))?
                .into_owned();
            if relocatable {
                apply_relocations(&file, &section, &mut data, endian)?;
            }
            sections.insert(*id, Arc::<[u8]>::from(data));
        }

        let mut image = Self::from_sections(name, endian, sections)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    /// Build an image from already extracted (and relocated) section data.
    ///
    /// Missing sections are treated as empty.
    ///
    /// ## Errors
    ///
    /// Returns [`IpftError::Dwarf`] if gimli rejects the section set.
    pub fn from_sections(
        name: impl Into<String>,
        endian: RunTimeEndian,
        sections: HashMap<SectionId, Arc<[u8]>>,
    ) -> Result<Self>
    {
        let name = name.into();
        let dwarf = OwnedDwarf::load(|id| {
            let data = sections.get(&id).cloned().unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
            Ok::<_, gimli::Error>(EndianArcSlice::new(data, endian))
        })
        .map_err(|err| map_dwarf_error("loading DWARF sections", err))?;

        let mut units = Vec::new();

        let mut headers = dwarf.units();
        loop {
            match headers.next() {
                Ok(Some(header)) => units.push(UnitSlot {
                    header,
                    parsed: OnceCell::new(),
                }),
                Ok(None) => break,
                Err(err) => {
                    warn!(image = %name, error = %err, "corrupt .debug_info unit header, ignoring the rest of the section");
                    break;
                }
            }
        }

        let mut type_headers = dwarf.type_units();
        loop {
            match type_headers.next() {
                Ok(Some(header)) => units.push(UnitSlot {
                    header,
                    parsed: OnceCell::new(),
                }),
                Ok(None) => break,
                Err(err) => {
                    warn!(image = %name, error = %err, "corrupt .debug_types unit header, ignoring the rest of the section");
                    break;
                }
            }
        }

        Ok(Self {
            name,
            path: None,
            dwarf,
            units,
        })
    }

    /// Human readable name (`vmlinux` or the module name).
    #[must_use]
    pub fn image_name(&self) -> &str
    {
        &self.name
    }

    /// File the image was loaded from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path>
    {
        self.path.as_deref()
    }

    /// Number of units (compilation and type units) in the image.
    #[must_use]
    pub fn unit_count(&self) -> usize
    {
        self.units.len()
    }

    /// Indices of the units that may contain function definitions.
    pub fn compilation_unit_indices(&self) -> impl Iterator<Item = usize> + '_
    {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.header.type_(), UnitType::Compilation | UnitType::Partial))
            .map(|(index, _)| index)
    }

    fn unit(&self, index: usize) -> Result<&OwnedUnit>
    {
        let slot = self
            .units
            .get(index)
            .ok_or_else(|| IpftError::DanglingReference(format!("{}: no unit #{index}", self.name)))?;
        slot.parsed.get_or_try_init(|| {
            self.dwarf
                .unit(slot.header.clone())
                .map_err(|err| map_dwarf_error("parsing unit", err))
        })
    }

    /// Root DIE of the unit at `index`.
    ///
    /// ## Errors
    ///
    /// Fails if the unit cannot be parsed.
    pub fn unit_root(&self, index: usize) -> Result<DieRef>
    {
        let unit = self.unit(index)?;
        let mut tree = unit
            .entries_tree(None)
            .map_err(|err| map_dwarf_error("building unit tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating unit root", err))?;
        Ok(DieRef::new(index, root.entry().offset()))
    }

    fn entry(&self, die: DieRef) -> Result<(&OwnedUnit, DebuggingInformationEntry<'_, '_, OwnedReader>)>
    {
        let unit = self.unit(die.unit)?;
        let entry = unit
            .entry(die.offset)
            .map_err(|err| map_dwarf_error("reading DIE", err))?;
        Ok((unit, entry))
    }

    /// Tag of `die`.
    ///
    /// ## Errors
    ///
    /// Fails if the DIE cannot be decoded.
    pub fn tag(&self, die: DieRef) -> Result<DwTag>
    {
        Ok(self.entry(die)?.1.tag())
    }

    /// `DW_AT_name` of `die`, copied into an owned string.
    ///
    /// ## Errors
    ///
    /// Fails if the DIE or its string cannot be decoded.
    pub fn name(&self, die: DieRef) -> Result<Option<String>>
    {
        let (unit, entry) = self.entry(die)?;
        match entry
            .attr_value(constants::DW_AT_name)
            .map_err(|err| map_dwarf_error("reading DW_AT_name", err))?
        {
            Some(value) => Ok(Some(self.attr_to_string(unit, value)?)),
            None => Ok(None),
        }
    }

    /// Raw value of attribute `at` on `die`.
    ///
    /// ## Errors
    ///
    /// Fails if the DIE cannot be decoded.
    pub fn attr_value(&self, die: DieRef, at: DwAt) -> Result<Option<AttributeValue<OwnedReader>>>
    {
        let (_, entry) = self.entry(die)?;
        entry
            .attr_value(at)
            .map_err(|err| map_dwarf_error(&format!("reading {at}"), err))
    }

    /// Encoding of the unit owning `die`, needed to decode location expressions.
    ///
    /// ## Errors
    ///
    /// Fails if the unit cannot be parsed.
    pub fn encoding(&self, die: DieRef) -> Result<gimli::Encoding>
    {
        Ok(self.unit(die.unit)?.encoding())
    }

    /// Whether `die` is a declaration (`DW_AT_declaration`), e.g. an
    /// incomplete `struct sk_buff;`.
    ///
    /// ## Errors
    ///
    /// Fails if the DIE cannot be decoded.
    pub fn is_declaration(&self, die: DieRef) -> Result<bool>
    {
        Ok(matches!(
            self.attr_value(die, constants::DW_AT_declaration)?,
            Some(AttributeValue::Flag(true))
        ))
    }

    /// Follow the reference attribute `at` of `die`.
    ///
    /// Returns `Ok(None)` when the attribute is absent.
    ///
    /// ## Errors
    ///
    /// [`IpftError::DanglingReference`] when the target does not exist,
    /// [`IpftError::UnsupportedAttribute`] when the attribute is not a reference.
    pub fn reference(&self, die: DieRef, at: DwAt) -> Result<Option<DieRef>>
    {
        let Some(value) = self.attr_value(die, at)? else {
            return Ok(None);
        };

        let target = match value {
            AttributeValue::UnitRef(offset) => DieRef::new(die.unit, offset),
            AttributeValue::DebugInfoRef(offset) => self.find_debug_info_offset(offset)?,
            AttributeValue::DebugTypesRef(signature) => self.find_type_signature(signature)?,
            _ => {
                return Err(IpftError::UnsupportedAttribute {
                    attribute: at,
                    die: self.describe(die),
                })
            }
        };

        if self.entry(target).is_err() {
            return Err(IpftError::DanglingReference(format!(
                "{at} of {} points to {}",
                self.describe(die),
                self.describe(target)
            )));
        }
        Ok(Some(target))
    }

    /// Shorthand for `reference(die, DW_AT_type)`.
    ///
    /// ## Errors
    ///
    /// See [`DebugImage::reference`].
    pub fn type_of(&self, die: DieRef) -> Result<Option<DieRef>>
    {
        self.reference(die, constants::DW_AT_type)
    }

    /// Direct children of `die` in declaration order.
    ///
    /// ## Errors
    ///
    /// Fails if the subtree cannot be decoded.
    pub fn children(&self, die: DieRef) -> Result<Vec<DieRef>>
    {
        let unit = self.unit(die.unit)?;
        let mut tree = unit
            .entries_tree(Some(die.offset))
            .map_err(|err| map_dwarf_error("building DIE tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating DIE tree", err))?;

        let mut children = root.children();
        let mut found = Vec::new();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating DIE children", err))?
        {
            found.push(DieRef::new(die.unit, child.entry().offset()));
        }
        Ok(found)
    }

    /// `image:unit#N+0xOFF` label for diagnostics.
    #[must_use]
    pub fn describe(&self, die: DieRef) -> String
    {
        format!("{}:{die}", self.name)
    }

    fn find_debug_info_offset(&self, target: DebugInfoOffset<usize>) -> Result<DieRef>
    {
        for (index, slot) in self.units.iter().enumerate() {
            let UnitSectionOffset::DebugInfoOffset(start) = slot.header.offset() else {
                continue;
            };
            let end = start.0.saturating_add(slot.header.length_including_self());
            if (start.0..end).contains(&target.0) {
                return Ok(DieRef::new(index, UnitOffset(target.0 - start.0)));
            }
        }
        Err(IpftError::DanglingReference(format!(
            "{}: .debug_info offset {:#x} is outside every unit",
            self.name, target.0
        )))
    }

    fn find_type_signature(&self, signature: DebugTypeSignature) -> Result<DieRef>
    {
        for (index, slot) in self.units.iter().enumerate() {
            match slot.header.type_() {
                UnitType::Type {
                    type_signature,
                    type_offset,
                }
                | UnitType::SplitType {
                    type_signature,
                    type_offset,
                } if type_signature == signature => {
                    return Ok(DieRef::new(index, type_offset));
                }
                _ => {}
            }
        }
        Err(IpftError::DanglingReference(format!(
            "{}: no type unit with signature {:#018x}",
            self.name, signature.0
        )))
    }

    fn attr_to_string(&self, unit: &OwnedUnit, value: AttributeValue<OwnedReader>) -> Result<String>
    {
        let reader = self
            .dwarf
            .attr_string(unit, value)
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let owned = match reader.to_string() {
            Ok(cow) => cow.into_owned(),
            Err(_) => reader
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
                .into_owned(),
        };
        Ok(owned)
    }
}

/// Apply the absolute relocations of `section` to its (uncompressed) `data`.
///
/// Only 32 and 64-bit absolute relocations occur in debug sections; anything
/// else is left untouched.
fn apply_relocations(
    file: &object::File<'_>,
    section: &object::Section<'_, '_>,
    data: &mut [u8],
    endian: RunTimeEndian,
) -> Result<()>
{
    for (offset, relocation) in section.relocations() {
        if relocation.kind() != RelocationKind::Absolute {
            trace!(section = ?section.name(), offset, kind = ?relocation.kind(), "skipping relocation");
            continue;
        }

        let base = match relocation.target() {
            RelocationTarget::Symbol(index) => file
                .symbol_by_index(index)
                .map_err(|err| object_error("resolving relocation symbol".to_string(), err))?
                .address(),
            RelocationTarget::Section(index) => file
                .section_by_index(index)
                .map_err(|err| object_error("resolving relocation section".to_string(), err))?
                .address(),
            RelocationTarget::Absolute => 0,
            _ => continue,
        };

        let start = usize::try_from(offset).map_err(|_| IpftError::Object {
            context: "applying relocation".to_string(),
            message: format!("offset {offset:#x} does not fit in usize"),
        })?;
        let width = match relocation.size() {
            32 => 4,
            64 => 8,
            _ => continue,
        };
        let Some(slot) = data.get_mut(start..start + width) else {
            return Err(IpftError::Object {
                context: "applying relocation".to_string(),
                message: format!("offset {start:#x} is past the end of the section"),
            });
        };

        let implicit = if relocation.has_implicit_addend() {
            if width == 4 {
                u64::from(endian.read_u32(slot))
            } else {
                endian.read_u64(slot)
            }
        } else {
            0
        };
        let value = base.wrapping_add_signed(relocation.addend()).wrapping_add(implicit);

        if width == 4 {
            // Truncation is what the relocation asks for.
            #[allow(clippy::cast_possible_truncation)]
            endian.write_u32(slot, value as u32);
        } else {
            endian.write_u64(slot, value);
        }
    }
    Ok(())
}

fn object_error(context: String, err: object::Error) -> IpftError
{
    IpftError::Object {
        context,
        message: err.to_string(),
    }
}
