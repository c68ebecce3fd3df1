//! # Resolver Configuration
//!
//! Two knobs sets are exposed to callers:
//!
//! - [`ResolverConfig`]: what to look for (target aggregate, member, limits)
//! - [`SourceConfig`]: where the kernel's debug information lives
//!
//! Both implement `Default` with the values the tracer uses in practice, and
//! offer `with_*` setters so the CLI can override single fields.

use std::path::PathBuf;

use crate::error::{IpftError, Result};

/// Structure whose pointer marks a candidate function.
pub const DEFAULT_TARGET_AGGREGATE: &str = "sk_buff";
/// Member whose byte offset is sought inside the target aggregate.
pub const DEFAULT_TARGET_MEMBER: &str = "mark";
/// kprobe + eBPF can only read the first four arguments reliably.
pub const DEFAULT_MAX_PARAM_POSITION: usize = 4;
/// Depth bound for the type walker; also acts as the cycle guard.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 4;

/// Default location of the loaded module list.
pub const DEFAULT_PROC_MODULES: &str = "/proc/modules";
/// Default location of the running kernel's release string.
pub const DEFAULT_OSRELEASE: &str = "/proc/sys/kernel/osrelease";

/// What the resolver searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig
{
    /// Name of the structure a parameter must point to
    pub target_aggregate: String,
    /// Name of the member whose offset is reported
    pub target_member: String,
    /// Highest usable 1-based parameter position
    pub max_param_position: usize,
    /// Maximum nesting depth the type walker descends into
    pub max_recursion_depth: usize,
}

impl Default for ResolverConfig
{
    fn default() -> Self
    {
        Self {
            target_aggregate: DEFAULT_TARGET_AGGREGATE.to_string(),
            target_member: DEFAULT_TARGET_MEMBER.to_string(),
            max_param_position: DEFAULT_MAX_PARAM_POSITION,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

impl ResolverConfig
{
    #[must_use]
    pub fn with_target_aggregate(mut self, name: impl Into<String>) -> Self
    {
        self.target_aggregate = name.into();
        self
    }

    #[must_use]
    pub fn with_target_member(mut self, name: impl Into<String>) -> Self
    {
        self.target_member = name.into();
        self
    }

    #[must_use]
    pub fn with_max_param_position(mut self, position: usize) -> Self
    {
        self.max_param_position = position;
        self
    }

    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self
    {
        self.max_recursion_depth = depth;
        self
    }

    /// Reject configurations that could never produce a record.
    ///
    /// ## Errors
    ///
    /// Returns [`IpftError::InvalidConfig`] when a name is empty or a limit is zero.
    pub fn validate(&self) -> Result<()>
    {
        if self.target_aggregate.is_empty() {
            return Err(IpftError::InvalidConfig("target aggregate name is empty".to_string()));
        }
        if self.target_member.is_empty() {
            return Err(IpftError::InvalidConfig("target member name is empty".to_string()));
        }
        if self.max_param_position == 0 {
            return Err(IpftError::InvalidConfig("max parameter position must be at least 1".to_string()));
        }
        if self.max_recursion_depth == 0 {
            return Err(IpftError::InvalidConfig("max recursion depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where to find the kernel's debug information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig
{
    /// Colon separated list of search roots; empty means `/`
    pub debuginfo_path: String,
    /// Explicit kernel image, bypassing the search
    pub vmlinux: Option<PathBuf>,
    /// Kernel release to search for instead of the running one
    pub kernel_release: Option<String>,
    /// File read for the running kernel's release
    pub osrelease: PathBuf,
    /// File listing the loaded modules
    pub proc_modules: PathBuf,
    /// Whether loaded modules are scanned at all
    pub modules: bool,
}

impl Default for SourceConfig
{
    fn default() -> Self
    {
        Self {
            debuginfo_path: String::new(),
            vmlinux: None,
            kernel_release: None,
            osrelease: PathBuf::from(DEFAULT_OSRELEASE),
            proc_modules: PathBuf::from(DEFAULT_PROC_MODULES),
            modules: true,
        }
    }
}

impl SourceConfig
{
    #[must_use]
    pub fn with_debuginfo_path(mut self, path: impl Into<String>) -> Self
    {
        self.debuginfo_path = path.into();
        self
    }

    #[must_use]
    pub fn with_vmlinux(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.vmlinux = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_kernel_release(mut self, release: impl Into<String>) -> Self
    {
        self.kernel_release = Some(release.into());
        self
    }

    #[must_use]
    pub fn with_proc_modules(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.proc_modules = path.into();
        self
    }

    #[must_use]
    pub fn with_modules(mut self, enabled: bool) -> Self
    {
        self.modules = enabled;
        self
    }
}
