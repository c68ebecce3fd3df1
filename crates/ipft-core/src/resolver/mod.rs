//! # Resolver
//!
//! Walks every compilation unit of a [`DebugInfoSource`] and fills a
//! [`SymsDb`] with the functions that take `struct sk_buff *` in a probeable
//! position, plus the offset of `mark` inside `struct sk_buff`.
//!
//! ## Flow
//!
//! ```text
//! DebugInfoSource ─▶ compilation unit ─▶ subprogram ─▶ FunctionScanner ─▶ SymsDb
//!                                                           │
//!                                                           └─▶ TypeWalker (first match only)
//! ```
//!
//! ## Failure Policy
//!
//! Decode errors confined to one unit are logged and the unit is skipped:
//! records are staged per unit and only merged once the whole unit decoded,
//! so a skipped unit contributes nothing. Failing to find the member offset, or finding two different ones, stops
//! the run.

use gimli::constants;
use tracing::{debug, info, info_span, warn};

use crate::config::{ResolverConfig, SourceConfig};
use crate::debuginfo::{CompilationUnit, DebugImage, DebugInfoSource, DieRef};
use crate::error::{IpftError, Result};
use crate::symsdb::SymsDb;

pub mod scanner;
pub mod walker;

pub use scanner::FunctionScanner;
pub use walker::TypeWalker;

/// Open the running kernel's debug info, scan it and release it again.
///
/// ## Errors
///
/// Any fatal error from [`DebugInfoSource::open`] or [`fill_sym2info`].
pub fn resolve(source_config: &SourceConfig, config: &ResolverConfig) -> Result<SymsDb>
{
    config.validate()?;
    let source = DebugInfoSource::open(source_config)?;
    let mut db = SymsDb::with_max_param_position(config.max_param_position);
    fill_sym2info(&source, config, &mut db)?;
    Ok(db)
}

/// Scan every compilation unit of `source` into `db`.
///
/// ## Errors
///
/// - [`IpftError::InvalidConfig`] for an unusable configuration, or when `db`
///   accepts fewer parameter positions than the scan may report
/// - [`IpftError::MarkOffsetNotFound`] if candidates exist but the member
///   offset could not be established
/// - [`IpftError::MarkOffsetConflict`] if two definitions disagree
pub fn fill_sym2info(source: &DebugInfoSource, config: &ResolverConfig, db: &mut SymsDb) -> Result<()>
{
    config.validate()?;
    if db.max_param_position() < config.max_param_position {
        return Err(IpftError::InvalidConfig(format!(
            "database accepts positions up to {} but the scan reports up to {}",
            db.max_param_position(),
            config.max_param_position
        )));
    }

    let mut units = 0usize;
    let mut skipped = 0usize;
    for unit in source.compilation_units() {
        units += 1;
        match scan_unit(unit, config, db.staging()) {
            Ok(staged) => {
                db.merge(staged)?;
            }
            Err(err) if err.is_recoverable() => {
                skipped += 1;
                warn!(
                    image = unit.image().image_name(),
                    unit = unit.index(),
                    error = %err,
                    "skipping compilation unit"
                );
            }
            Err(err) => return Err(err),
        }
    }

    if !db.is_empty() && db.mark_offset().is_none() {
        return Err(IpftError::MarkOffsetNotFound {
            aggregate: config.target_aggregate.clone(),
            member: config.target_member.clone(),
            reason: "only incomplete declarations of the aggregate were seen".to_string(),
        });
    }

    info!(
        units,
        skipped,
        functions = db.len(),
        mark_offset = ?db.mark_offset(),
        "resolved {} candidates",
        config.target_aggregate
    );
    Ok(())
}

/// Scan one unit into `staged`, which is returned only if the unit decoded.
fn scan_unit(unit: CompilationUnit<'_>, config: &ResolverConfig, mut staged: SymsDb) -> Result<SymsDb>
{
    let image = unit.image();
    let span = info_span!("unit", image = image.image_name(), index = unit.index());
    let _entered = span.enter();

    let root = unit.root()?;
    let scanner = FunctionScanner::new(image, config);
    let recorded = scan_scope(image, &scanner, root, &mut staged)?;
    if recorded > 0 {
        debug!(recorded, "unit scanned");
    }
    Ok(staged)
}

/// Scan the subprograms directly below `scope`, descending into namespaces.
fn scan_scope(image: &DebugImage, scanner: &FunctionScanner<'_>, scope: DieRef, db: &mut SymsDb) -> Result<usize>
{
    let mut recorded = 0;
    for child in image.children(scope)? {
        match image.tag(child)? {
            constants::DW_TAG_subprogram => {
                if scanner.scan(child, db)? {
                    recorded += 1;
                }
            }
            constants::DW_TAG_namespace => recorded += scan_scope(image, scanner, child, db)?,
            _ => {}
        }
    }
    Ok(recorded)
}
