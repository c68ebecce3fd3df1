use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use ipft_core::config::{DEFAULT_MAX_PARAM_POSITION, DEFAULT_TARGET_AGGREGATE, DEFAULT_TARGET_MEMBER};
use ipft_core::{resolve, ResolverConfig, SourceConfig, SymsDb};
use ipft_utils::{debug, info, init_logging, LogFormat, LogLevel};
use regex::Regex;

/// Trace packets carrying a given skb mark through the Linux kernel.
#[derive(Parser, Debug)]
#[command(name = "ipft")]
#[command(version)]
#[command(about = "Trace packets carrying a given skb mark through the Linux kernel", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); defaults to RUST_LOG or warn
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (pretty or json); defaults to IPFT_LOG_FORMAT or pretty
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List the kernel functions that can be traced and their skb argument position
    List
    {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        resolver: ResolverArgs,

        /// Only print functions whose name matches this regular expression
        #[arg(long, value_name = "REGEX")]
        regex: Option<String>,
    },
}

#[derive(Args, Debug)]
struct SourceArgs
{
    /// Colon separated list of roots to search for vmlinux and modules
    #[arg(long, default_value = "")]
    debuginfo_path: String,

    /// Use this kernel image instead of searching for one
    #[arg(long)]
    vmlinux: Option<PathBuf>,

    /// Kernel release to search for (default: the running kernel)
    #[arg(long)]
    kernel_release: Option<String>,

    /// Do not scan loaded kernel modules
    #[arg(long, default_value_t = false)]
    no_modules: bool,
}

impl From<SourceArgs> for SourceConfig
{
    fn from(args: SourceArgs) -> Self
    {
        let mut config = SourceConfig::default()
            .with_debuginfo_path(args.debuginfo_path)
            .with_modules(!args.no_modules);
        if let Some(vmlinux) = args.vmlinux {
            config = config.with_vmlinux(vmlinux);
        }
        if let Some(release) = args.kernel_release {
            config = config.with_kernel_release(release);
        }
        config
    }
}

#[derive(Args, Debug)]
struct ResolverArgs
{
    /// Structure whose pointer marks a traceable function
    #[arg(long, default_value = DEFAULT_TARGET_AGGREGATE)]
    aggregate: String,

    /// Member whose offset is reported
    #[arg(long, default_value = DEFAULT_TARGET_MEMBER)]
    member: String,

    /// Highest argument position a probe can read
    #[arg(long, default_value_t = DEFAULT_MAX_PARAM_POSITION)]
    max_param_position: usize,
}

impl From<ResolverArgs> for ResolverConfig
{
    fn from(args: ResolverArgs) -> Self
    {
        ResolverConfig::default()
            .with_target_aggregate(args.aggregate)
            .with_target_member(args.member)
            .with_max_param_position(args.max_param_position)
    }
}

fn main()
{
    let cli = Cli::parse();

    // The guard flushes file output when dropped, keep it for the whole run.
    let _logging = match init_logging(cli.log_level, cli.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::List {
            source,
            resolver,
            regex,
        } => {
            // Reject a bad pattern before the expensive debug-info walk.
            let regex = regex.as_deref().map(Regex::new).transpose()?;
            let source = SourceConfig::from(source);
            let resolver = ResolverConfig::from(resolver);
            debug!(?source, ?resolver, ?regex, "listing functions");

            let db = resolve(&source, &resolver)?;
            let printed = print_functions(&db, regex.as_ref())?;

            info!(printed, total = db.len(), "listing done");
            print_summary(&db, &resolver, printed);
            Ok(())
        }
    }
}

/// Functions to list, sorted by name and narrowed to `regex` matches.
fn select_functions<'a>(db: &'a SymsDb, regex: Option<&Regex>) -> Vec<(&'a str, usize)>
{
    db.sorted()
        .into_iter()
        .filter(|(name, _)| regex.is_none_or(|regex| regex.is_match(name)))
        .map(|(name, info)| (name, info.skb_pos))
        .collect()
}

/// `<function> <skb_pos>` per line.
fn print_functions(db: &SymsDb, regex: Option<&Regex>) -> io::Result<usize>
{
    let selected = select_functions(db, regex);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for (name, skb_pos) in &selected {
        writeln!(out, "{name} {skb_pos}")?;
    }
    out.flush()?;
    Ok(selected.len())
}

fn print_summary(db: &SymsDb, resolver: &ResolverConfig, printed: usize)
{
    let offset = db
        .mark_offset()
        .map_or_else(|| "unknown".to_string(), |offset| offset.to_string());
    if printed == db.len() {
        eprintln!("{} functions, offsetof({}, {}) = {}", db.len(), resolver.target_aggregate, resolver.target_member, offset);
    } else {
        eprintln!(
            "{printed} of {} functions, offsetof({}, {}) = {}",
            db.len(),
            resolver.target_aggregate,
            resolver.target_member,
            offset
        );
    }
}
