//! # Error Types
//!
//! Error handling for the debug-info resolver.
//!
//! We use `thiserror` to generate the `Error` trait implementations and the
//! user facing messages. Each variant names the stage that failed so the CLI
//! can print a single line and exit.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for resolver operations
///
/// ## Error Categories
///
/// 1. **Source errors**: SourceOpen, NoDebugInfo, Object, Io
/// 2. **Decode errors**: Dwarf, DanglingReference, MissingAttribute, UnsupportedAttribute
/// 3. **Resolution errors**: MarkOffsetNotFound, MarkOffsetConflict
/// 4. **Usage errors**: InvalidRecord, InvalidConfig
///
/// Decode errors are scoped to one compilation unit and the driver recovers
/// from them (see [`IpftError::is_recoverable`]). Everything else aborts the run.
#[derive(Error, Debug)]
pub enum IpftError
{
    /// The kernel's debug information could not be located or opened
    #[error("Failed to open kernel debug info: {0}")]
    SourceOpen(String),

    /// The object file exists but carries no `.debug_info`
    #[error("No debug info in {}", .0.display())]
    NoDebugInfo(PathBuf),

    /// The ELF container could not be parsed or relocated
    #[error("Object error while {context}: {message}")]
    Object
    {
        /// What we were doing when the failure happened
        context: String,
        /// Message reported by `object`
        message: String,
    },

    /// gimli failed to decode part of a DIE tree
    #[error("DWARF error while {context}: {source}")]
    Dwarf
    {
        /// What we were doing when the failure happened
        context: String,
        /// Underlying decoder error
        #[source]
        source: gimli::Error,
    },

    /// A reference attribute points outside of every known unit
    #[error("Dangling DWARF reference: {0}")]
    DanglingReference(String),

    /// A DIE lacks an attribute the walker cannot do without
    #[error("Missing {attribute} on DIE {die}")]
    MissingAttribute
    {
        /// The attribute that was expected
        attribute: gimli::DwAt,
        /// Where the DIE lives
        die: String,
    },

    /// An attribute is present but its form cannot be interpreted
    #[error("Unsupported encoding of {attribute} on DIE {die}")]
    UnsupportedAttribute
    {
        /// The attribute that could not be decoded
        attribute: gimli::DwAt,
        /// Where the DIE lives
        die: String,
    },

    /// The target member could not be located inside the target aggregate
    ///
    /// Without this offset no probe can filter on the mark, so the run stops.
    #[error("Failed to get offset of `{member}` in struct {aggregate}: {reason}")]
    MarkOffsetNotFound
    {
        /// Name of the target aggregate (usually `sk_buff`)
        aggregate: String,
        /// Name of the sought member (usually `mark`)
        member: String,
        /// Why the lookup failed
        reason: String,
    },

    /// Two definitions of the target aggregate disagree on the member offset
    #[error("Mark offset conflict: already recorded {existing}, discovered {discovered}")]
    MarkOffsetConflict
    {
        /// Offset stored first
        existing: u64,
        /// Offset found later
        discovered: u64,
    },

    /// A record was rejected by the symbol database
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Resolver configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while reading debug info or `/proc`
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpftError
{
    /// Whether the driver may skip the current compilation unit and go on.
    #[must_use]
    pub fn is_recoverable(&self) -> bool
    {
        matches!(
            self,
            Self::Dwarf { .. } | Self::DanglingReference(_) | Self::MissingAttribute { .. } | Self::UnsupportedAttribute { .. }
        )
    }
}

pub(crate) fn map_dwarf_error(context: &str, source: gimli::Error) -> IpftError
{
    IpftError::Dwarf {
        context: context.to_string(),
        source,
    }
}

/// Convenience type alias for `Result<T, IpftError>`
///
/// ```rust
/// use ipft_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, IpftError>;
