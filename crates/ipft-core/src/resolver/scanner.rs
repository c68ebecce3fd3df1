//! Per-function parameter inspection.

use gimli::constants;
use tracing::{debug, trace};

use super::walker::TypeWalker;
use crate::config::ResolverConfig;
use crate::debuginfo::{DebugImage, DieRef};
use crate::error::{IpftError, Result};
use crate::symsdb::{SymInfo, SymsDb};

/// Abstract origins and specifications can chain (inline → abstract → declaration).
const MAX_ORIGIN_HOPS: usize = 4;

/// Finds the target-aggregate pointer among a subprogram's parameters.
#[derive(Debug, Clone, Copy)]
pub struct FunctionScanner<'a>
{
    image: &'a DebugImage,
    config: &'a ResolverConfig,
}

impl<'a> FunctionScanner<'a>
{
    #[must_use]
    pub fn new(image: &'a DebugImage, config: &'a ResolverConfig) -> Self
    {
        Self { image, config }
    }

    /// Inspect one `DW_TAG_subprogram` and record it in `db` if one of its
    /// first `max_param_position` parameters is `struct <target_aggregate> *`.
    ///
    /// The first matching parameter wins. The first complete definition of the
    /// target aggregate seen in the run is walked to discover the member
    /// offset.
    ///
    /// Returns whether a new record was stored.
    ///
    /// ## Errors
    ///
    /// - [`IpftError::MarkOffsetNotFound`] if the member cannot be located
    /// - decode errors for the subprogram's own DIEs
    pub fn scan(&self, subprogram: DieRef, db: &mut SymsDb) -> Result<bool>
    {
        let Some(name) = self.function_name(subprogram)? else {
            return Ok(false);
        };

        let mut position = 0;
        for child in self.image.children(subprogram)? {
            if self.image.tag(child)? != constants::DW_TAG_formal_parameter {
                continue;
            }
            position += 1;
            if position > self.config.max_param_position {
                break;
            }

            let Some(aggregate) = self.target_pointee(child)? else {
                continue;
            };

            if db.mark_offset().is_none() {
                self.discover_mark_offset(aggregate, db)?;
            }

            let info = SymInfo::new(position);
            let inserted = db.put_sym2info(&name, info)?;
            if !inserted {
                if let Some(existing) = db.get_sym2info(&name).filter(|existing| *existing != info) {
                    debug!(
                        function = %name,
                        kept = existing.skb_pos,
                        ignored = position,
                        "duplicate function with a different skb position"
                    );
                }
            }
            return Ok(inserted);
        }

        Ok(false)
    }

    fn discover_mark_offset(&self, aggregate: DieRef, db: &mut SymsDb) -> Result<()>
    {
        if self.image.is_declaration(aggregate)? {
            trace!(die = %self.image.describe(aggregate), "incomplete target aggregate, deferring offset discovery");
            return Ok(());
        }

        let walker = TypeWalker::new(self.image, &self.config.target_member, self.config.max_recursion_depth);
        let not_found = |reason: String| IpftError::MarkOffsetNotFound {
            aggregate: self.config.target_aggregate.clone(),
            member: self.config.target_member.clone(),
            reason,
        };

        match walker.find_member_offset(aggregate, 0, 0) {
            Ok(Some(offset)) => {
                debug!(
                    die = %self.image.describe(aggregate),
                    offset,
                    "discovered {} offset",
                    self.config.target_member
                );
                db.put_mark_offset(offset)
            }
            Ok(None) => Err(not_found(format!(
                "no such member within {} levels of {}",
                self.config.max_recursion_depth,
                self.image.describe(aggregate)
            ))),
            Err(err) => Err(not_found(err.to_string())),
        }
    }

    /// The structure `param` points to, if `param` is `struct <target> *`.
    fn target_pointee(&self, param: DieRef) -> Result<Option<DieRef>>
    {
        let Some(param_type) = self.parameter_type(param)? else {
            return Ok(None);
        };
        if self.image.tag(param_type)? != constants::DW_TAG_pointer_type {
            return Ok(None);
        }

        let Some(pointee) = self.lenient_type_of(param_type) else {
            return Ok(None);
        };
        if self.image.tag(pointee)? != constants::DW_TAG_structure_type {
            return Ok(None);
        }
        if self.image.name(pointee)?.as_deref() != Some(self.config.target_aggregate.as_str()) {
            return Ok(None);
        }
        Ok(Some(pointee))
    }

    /// `DW_AT_type` of a parameter, looking through `DW_AT_abstract_origin`
    /// for concrete instances of inlined functions.
    fn parameter_type(&self, param: DieRef) -> Result<Option<DieRef>>
    {
        let mut current = param;
        for _ in 0..MAX_ORIGIN_HOPS {
            if let Some(ty) = self.lenient_type_of(current) {
                return Ok(Some(ty));
            }
            match self.image.reference(current, constants::DW_AT_abstract_origin) {
                Ok(Some(origin)) => current = origin,
                Ok(None) => return Ok(None),
                Err(err) => {
                    trace!(die = %self.image.describe(current), error = %err, "unusable abstract origin");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Broken type references only disqualify the parameter, they do not
    /// abort the unit.
    fn lenient_type_of(&self, die: DieRef) -> Option<DieRef>
    {
        match self.image.type_of(die) {
            Ok(ty) => ty,
            Err(err) => {
                trace!(die = %self.image.describe(die), error = %err, "unusable type reference");
                None
            }
        }
    }

    /// `DW_AT_name`, or the name of the abstract origin / specification.
    fn function_name(&self, subprogram: DieRef) -> Result<Option<String>>
    {
        let mut current = subprogram;
        for _ in 0..MAX_ORIGIN_HOPS {
            if let Some(name) = self.image.name(current)?.filter(|name| !name.is_empty()) {
                return Ok(Some(name));
            }
            let origin = match self.image.reference(current, constants::DW_AT_abstract_origin)? {
                Some(origin) => Some(origin),
                None => self.image.reference(current, constants::DW_AT_specification)?,
            };
            match origin {
                Some(origin) => current = origin,
                None => return Ok(None),
            }
        }
        Ok(None)
    }
}
