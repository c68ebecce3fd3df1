//! # ipft-core
//!
//! Debug-info resolver for the ipft packet tracer.
//!
//! Before any probe is attached, ipft needs to know which kernel functions
//! receive a `struct sk_buff *` among their first few arguments, at which
//! position, and where `mark` lives inside `struct sk_buff`. This crate reads
//! the kernel's DWARF to answer those questions:
//!
//! - [`debuginfo`]: locate and open `vmlinux` and loaded modules
//! - [`resolver`]: scan subprograms and walk aggregate types
//! - [`symsdb`]: the resulting function records and mark offset
//!
//! ## Example
//!
//! ```rust,no_run
//! use ipft_core::{resolve, ResolverConfig, SourceConfig};
//!
//! let db = resolve(&SourceConfig::default(), &ResolverConfig::default())?;
//! for (name, info) in db.sorted() {
//!     println!("{name} {}", info.skb_pos);
//! }
//! # Ok::<(), ipft_core::IpftError>(())
//! ```

pub mod config;
pub mod debuginfo;
pub mod error;
pub mod resolver;
pub mod symsdb;

pub use config::{ResolverConfig, SourceConfig};
pub use debuginfo::{DebugImage, DebugInfoSource, DieRef};
pub use error::{IpftError, Result};
pub use resolver::{fill_sym2info, resolve};
pub use symsdb::{SymInfo, SymsDb};
