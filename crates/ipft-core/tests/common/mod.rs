//! DWARF fixtures for integration tests.
//!
//! Images are produced with `gimli::write` and read back through
//! `DebugImage::from_sections`, so the tests exercise the same decoding path
//! as a real `vmlinux`. [`ImageBuilder::build_elf`] goes one step further and
//! wraps the sections in a relocatable ELF object like a `.ko`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use gimli::write::{self, AttributeValue, EndianVec, Expression, LineProgram, Reference, Sections, UnitEntryId, UnitId};
use gimli::{constants, DwAt, DwTag, Encoding, Format, LittleEndian, RunTimeEndian, SectionId};
use ipft_core::{DebugImage, DebugInfoSource, DieRef};
use object::write::{Object, Relocation, SectionId as ObjectSectionId};
use object::{Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind, SectionKind};

/// Byte offset of `debug_abbrev_offset` inside a DWARF32 v4 unit header.
const ABBREV_OFFSET_FIELD: usize = 6;

/// A DIE under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Die
{
    unit: UnitId,
    entry: UnitEntryId,
}

pub struct ImageBuilder
{
    dwarf: write::Dwarf,
    encoding: Encoding,
}

impl Default for ImageBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ImageBuilder
{
    pub fn new() -> Self
    {
        Self {
            dwarf: write::Dwarf::new(),
            encoding: Encoding {
                format: Format::Dwarf32,
                version: 4,
                address_size: 8,
            },
        }
    }

    /// Add a compilation unit and return its root.
    pub fn add_unit(&mut self) -> Die
    {
        let unit = self
            .dwarf
            .units
            .add(write::Unit::new(self.encoding, LineProgram::none()));
        let entry = self.dwarf.units.get(unit).root();
        Die { unit, entry }
    }

    pub fn add(&mut self, parent: Die, tag: DwTag) -> Die
    {
        let entry = self.dwarf.units.get_mut(parent.unit).add(parent.entry, tag);
        Die {
            unit: parent.unit,
            entry,
        }
    }

    pub fn set(&mut self, die: Die, at: DwAt, value: AttributeValue)
    {
        self.dwarf
            .units
            .get_mut(die.unit)
            .get_mut(die.entry)
            .set(at, value);
    }

    pub fn set_name(&mut self, die: Die, name: &str)
    {
        self.set(die, constants::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
    }

    /// Point `at` of `die` to `target`, across units if needed.
    pub fn set_ref(&mut self, die: Die, at: DwAt, target: Die)
    {
        let value = if die.unit == target.unit {
            AttributeValue::UnitRef(target.entry)
        } else {
            AttributeValue::DebugInfoRef(Reference::Entry(target.unit, target.entry))
        };
        self.set(die, at, value);
    }

    pub fn set_type(&mut self, die: Die, ty: Die)
    {
        self.set_ref(die, constants::DW_AT_type, ty);
    }

    pub fn base_type(&mut self, parent: Die, name: &str, size: u64) -> Die
    {
        let die = self.add(parent, constants::DW_TAG_base_type);
        self.set_name(die, name);
        self.set(die, constants::DW_AT_byte_size, AttributeValue::Udata(size));
        die
    }

    pub fn structure(&mut self, parent: Die, name: Option<&str>) -> Die
    {
        let die = self.add(parent, constants::DW_TAG_structure_type);
        if let Some(name) = name {
            self.set_name(die, name);
        }
        die
    }

    pub fn union(&mut self, parent: Die) -> Die
    {
        self.add(parent, constants::DW_TAG_union_type)
    }

    /// `struct <name>;`
    pub fn declaration(&mut self, parent: Die, name: &str) -> Die
    {
        let die = self.structure(parent, Some(name));
        self.set(die, constants::DW_AT_declaration, AttributeValue::Flag(true));
        die
    }

    /// Member with a constant `DW_AT_data_member_location`; `None` omits it.
    pub fn member(&mut self, aggregate: Die, name: Option<&str>, ty: Die, location: Option<u64>) -> Die
    {
        let die = self.add(aggregate, constants::DW_TAG_member);
        if let Some(name) = name {
            self.set_name(die, name);
        }
        self.set_type(die, ty);
        if let Some(location) = location {
            self.set(die, constants::DW_AT_data_member_location, AttributeValue::Udata(location));
        }
        die
    }

    /// Member whose location is a raw DWARF expression.
    pub fn member_exprloc(&mut self, aggregate: Die, name: &str, ty: Die, expression: &[u8]) -> Die
    {
        let die = self.add(aggregate, constants::DW_TAG_member);
        self.set_name(die, name);
        self.set_type(die, ty);
        self.set(
            die,
            constants::DW_AT_data_member_location,
            AttributeValue::Exprloc(Expression::raw(expression.to_vec())),
        );
        die
    }

    pub fn pointer(&mut self, parent: Die, to: Die) -> Die
    {
        let die = self.add(parent, constants::DW_TAG_pointer_type);
        self.set(die, constants::DW_AT_byte_size, AttributeValue::Udata(8));
        self.set_type(die, to);
        die
    }

    /// Subprogram with one formal parameter per entry of `params`.
    pub fn subprogram(&mut self, parent: Die, name: &str, params: &[Die]) -> Die
    {
        let die = self.add(parent, constants::DW_TAG_subprogram);
        self.set_name(die, name);
        for (index, ty) in params.iter().enumerate() {
            let param = self.add(die, constants::DW_TAG_formal_parameter);
            self.set_name(param, &format!("arg{index}"));
            self.set_type(param, *ty);
        }
        die
    }

    /// `struct sk_buff { void *next; ...; __u32 mark; }` with `mark` at `offset`.
    pub fn sk_buff(&mut self, parent: Die, mark_offset: u64) -> Die
    {
        let u32_type = self.base_type(parent, "unsigned int", 4);
        let skb = self.structure(parent, Some("sk_buff"));
        let next = self.pointer(parent, skb);
        self.member(skb, Some("next"), next, Some(0));
        self.member(skb, Some("mark"), u32_type, Some(mark_offset));
        skb
    }

    fn write_sections(&mut self) -> HashMap<SectionId, Vec<u8>>
    {
        let mut sections = Sections::new(EndianVec::new(LittleEndian));
        self.dwarf.write(&mut sections).expect("fixture DWARF is writable");

        let mut data = HashMap::new();
        sections
            .for_each(|id, section| {
                data.insert(id, section.slice().to_vec());
                Ok::<(), gimli::write::Error>(())
            })
            .expect("fixture sections are collectable");
        data
    }

    pub fn build(mut self, name: &str) -> DebugImage
    {
        let data: HashMap<SectionId, Arc<[u8]>> = self
            .write_sections()
            .into_iter()
            .map(|(id, bytes)| (id, Arc::from(bytes)))
            .collect();
        DebugImage::from_sections(name, RunTimeEndian::Little, data).expect("fixture DWARF is readable")
    }

    /// Relocatable x86-64 ELF object holding the fixture DWARF.
    ///
    /// Like a compiler-emitted `.ko`, every unit header carries a zero
    /// abbreviation offset in the file and the real one in an
    /// `R_X86_64_32` relocation against `.debug_abbrev`.
    pub fn build_elf(mut self) -> Vec<u8>
    {
        let mut sections = self.write_sections();
        let mut info = sections.remove(&SectionId::DebugInfo).expect("fixture has .debug_info");

        let mut patches = Vec::new();
        let mut headers = gimli::DebugInfo::new(&info, LittleEndian).units();
        while let Some(header) = headers.next().expect("fixture unit headers parse") {
            let unit = header.offset().as_debug_info_offset().expect("unit lives in .debug_info").0;
            patches.push((unit + ABBREV_OFFSET_FIELD, header.debug_abbrev_offset().0));
        }
        for (field, _) in &patches {
            info[*field..*field + 4].fill(0);
        }

        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let mut ids: HashMap<SectionId, ObjectSectionId> = HashMap::new();
        for (id, bytes) in sections.iter().chain(std::iter::once((&SectionId::DebugInfo, &info))) {
            let section = obj.add_section(Vec::new(), id.name().as_bytes().to_vec(), SectionKind::Debug);
            obj.append_section_data(section, bytes, 1);
            ids.insert(*id, section);
        }

        let abbrev = obj.section_symbol(ids[&SectionId::DebugAbbrev]);
        for (field, abbrev_offset) in patches {
            obj.add_relocation(
                ids[&SectionId::DebugInfo],
                Relocation {
                    offset: field as u64,
                    symbol: abbrev,
                    addend: abbrev_offset as i64,
                    flags: RelocationFlags::Generic {
                        kind: RelocationKind::Absolute,
                        encoding: RelocationEncoding::Generic,
                        size: 32,
                    },
                },
            )
            .expect("abbrev relocation is representable");
        }
        obj.write().expect("fixture ELF is writable")
    }
}

/// Relocatable ELF object with code but no DWARF, like a stripped module.
pub fn elf_without_debug_info() -> Vec<u8>
{
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.append_section_data(text, &[0xc3], 1);
    obj.write().expect("fixture ELF is writable")
}

/// Wrap fixture images in a source, the first one playing `vmlinux`.
pub fn source(images: Vec<DebugImage>) -> DebugInfoSource
{
    DebugInfoSource::from_images(images)
}

/// First DIE directly below any unit root with the given tag and name.
pub fn find_top_level(image: &DebugImage, tag: DwTag, name: &str) -> Option<DieRef>
{
    for index in image.compilation_unit_indices() {
        let root = image.unit_root(index).ok()?;
        for child in image.children(root).ok()? {
            if image.tag(child).ok()? == tag && image.name(child).ok()?.as_deref() == Some(name) {
                return Some(child);
            }
        }
    }
    None
}
