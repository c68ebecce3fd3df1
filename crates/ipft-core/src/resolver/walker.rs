//! Member offset lookup through nested aggregates.
//!
//! `struct sk_buff` keeps `mark` inside anonymous unions and structs whose
//! layout changes between kernel versions, so the offset has to be computed
//! by walking the type rather than hard-coded.

use gimli::{constants, AttributeValue, Encoding, Operation};

use crate::debuginfo::{DebugImage, DieRef, OwnedReader};
use crate::error::{IpftError, Result};

/// Depth-first search for a named member inside a structure or union.
#[derive(Debug, Clone, Copy)]
pub struct TypeWalker<'a>
{
    image: &'a DebugImage,
    member: &'a str,
    max_depth: usize,
}

impl<'a> TypeWalker<'a>
{
    #[must_use]
    pub fn new(image: &'a DebugImage, member: &'a str, max_depth: usize) -> Self
    {
        Self {
            image,
            member,
            max_depth,
        }
    }

    /// Byte offset of the first member named `self.member` below `aggregate`.
    ///
    /// `depth` and `offset` describe where `aggregate` itself sits: pass `0, 0`
    /// for the outermost type. Members whose type is a structure or union are
    /// searched recursively with their location added to the running offset.
    ///
    /// Returns `Ok(None)` when the member is not reachable within the depth
    /// limit. An offset of zero is a real result.
    ///
    /// ## Errors
    ///
    /// Fails when a member has no (or a dangling) `DW_AT_type`, or a location
    /// that does not decode to a constant.
    pub fn find_member_offset(&self, aggregate: DieRef, depth: usize, offset: u64) -> Result<Option<u64>>
    {
        if depth >= self.max_depth {
            return Ok(None);
        }

        for child in self.image.children(aggregate)? {
            if self.image.tag(child)? != constants::DW_TAG_member {
                continue;
            }

            let location = self.member_location(child)?;
            let member_type = self
                .image
                .type_of(child)?
                .ok_or_else(|| IpftError::MissingAttribute {
                    attribute: constants::DW_AT_type,
                    die: self.image.describe(child),
                })?;
            let member_offset = offset
                .checked_add(location)
                .ok_or_else(|| IpftError::UnsupportedAttribute {
                    attribute: constants::DW_AT_data_member_location,
                    die: self.image.describe(child),
                })?;

            match self.image.tag(member_type)? {
                constants::DW_TAG_structure_type | constants::DW_TAG_union_type => {
                    if let Some(found) = self.find_member_offset(member_type, depth + 1, member_offset)? {
                        return Ok(Some(found));
                    }
                }
                _ => {
                    if self.image.name(child)?.as_deref() == Some(self.member) {
                        return Ok(Some(member_offset));
                    }
                }
            }
        }

        Ok(None)
    }

    /// `DW_AT_data_member_location` as a byte offset; absent means 0 (unions).
    fn member_location(&self, member: DieRef) -> Result<u64>
    {
        let Some(value) = self.image.attr_value(member, constants::DW_AT_data_member_location)? else {
            return Ok(0);
        };

        if let Some(location) = value.udata_value() {
            return Ok(location);
        }
        if let AttributeValue::Exprloc(expression) = value {
            if let Some(location) = constant_location(expression, self.image.encoding(member)?) {
                return Ok(location);
            }
        }

        Err(IpftError::UnsupportedAttribute {
            attribute: constants::DW_AT_data_member_location,
            die: self.image.describe(member),
        })
    }
}

/// Evaluate the `DW_OP_plus_uconst N` / `DW_OP_constu N` forms older
/// producers emit for member locations.
pub(crate) fn constant_location(expression: gimli::Expression<OwnedReader>, encoding: Encoding) -> Option<u64>
{
    let mut operations = expression.operations(encoding);
    let mut location: Option<u64> = None;
    loop {
        match operations.next() {
            Ok(Some(Operation::PlusConstant { value })) => location = Some(location.unwrap_or(0).checked_add(value)?),
            Ok(Some(Operation::UnsignedConstant { value })) => location = Some(value),
            Ok(Some(_)) | Err(_) => return None,
            Ok(None) => return location,
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use gimli::{EndianArcSlice, Format, RunTimeEndian};

    use super::*;

    const ENCODING: Encoding = Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    };

    fn expression(bytes: &[u8]) -> gimli::Expression<OwnedReader>
    {
        gimli::Expression(EndianArcSlice::new(Arc::<[u8]>::from(bytes), RunTimeEndian::Little))
    }

    #[test]
    fn test_plus_uconst_location()
    {
        // DW_OP_plus_uconst 20
        assert_eq!(constant_location(expression(&[0x23, 20]), ENCODING), Some(20));
        // DW_OP_plus_uconst 200 (two byte ULEB128)
        assert_eq!(constant_location(expression(&[0x23, 0xc8, 0x01]), ENCODING), Some(200));
    }

    #[test]
    fn test_constu_location()
    {
        // DW_OP_constu 8
        assert_eq!(constant_location(expression(&[0x10, 8]), ENCODING), Some(8));
    }

    #[test]
    fn test_non_constant_location_is_rejected()
    {
        assert_eq!(constant_location(expression(&[]), ENCODING), None);
        // DW_OP_reg0
        assert_eq!(constant_location(expression(&[0x50]), ENCODING), None);
        // truncated DW_OP_plus_uconst
        assert_eq!(constant_location(expression(&[0x23]), ENCODING), None);
    }
}
