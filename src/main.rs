//! Karmic - Karma-style script injection for a simulated browser document
//!
//! Command line front end: load a file list into a fresh document, evaluate
//! code against it, or show what a pattern list expands to.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use karmic::{
    ExpandOrder, FilePatternExpander, HarnessConfig, LoadStatus, SetupReport, load_config, setup,
};

#[derive(Parser)]
#[command(name = "karmic")]
#[command(author, version, about = "Karma-style script injection powered by Boa")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct HarnessArgs {
    /// JSON config file (camelCase keys, merged over the defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory patterns are resolved against
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Load files in pattern order instead of sorted order
    #[arg(long)]
    declared: bool,

    /// Skip bridging window functions into the host scope
    #[arg(long)]
    no_bridge: bool,

    /// File patterns; replace the configured list when given
    patterns: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load scripts into a simulated document and report the outcome
    Load {
        #[command(flatten)]
        harness: HarnessArgs,
    },
    /// Load scripts, then evaluate code against the document
    Eval {
        /// Code to evaluate
        code: String,
        #[command(flatten)]
        harness: HarnessArgs,
    },
    /// Print the files a pattern list expands to
    Expand {
        /// Directory patterns are resolved against
        #[arg(long)]
        base_dir: Option<PathBuf>,
        /// Keep pattern order instead of sorting
        #[arg(long)]
        declared: bool,
        /// File patterns (defaults to the standard load list)
        patterns: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The Boa context is not Send, everything runs on this thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    match cli.command {
        Commands::Load { harness } => runtime.block_on(load(harness)),
        Commands::Eval { code, harness } => runtime.block_on(eval(&code, harness)),
        Commands::Expand {
            base_dir,
            declared,
            patterns,
        } => expand(base_dir, declared, patterns),
    }
}

fn order(declared: bool) -> ExpandOrder {
    if declared {
        ExpandOrder::Declared
    } else {
        ExpandOrder::Sorted
    }
}

/// Build the harness config from a config file and command line overrides
fn harness_config(args: HarnessArgs) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path).into_diagnostic()?,
        None => HarnessConfig::default(),
    };

    if !args.patterns.is_empty() {
        config.files = args.patterns;
    }
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    if args.declared {
        config.order = ExpandOrder::Declared;
    }
    if args.no_bridge {
        config.bridge = false;
    }
    Ok(config)
}

fn print_report(report: &SetupReport) {
    for outcome in &report.results {
        match outcome.status {
            LoadStatus::Success => println!("  {} {}", "✓".green(), outcome.file),
            LoadStatus::Error | LoadStatus::PatternError => println!(
                "  {} {}: {}",
                "✗".red(),
                outcome.file,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    println!();
    println!(
        "{}: {} loaded, {} failed",
        "Summary".cyan().bold(),
        report.successful,
        report.failed
    );

    if let Some(bridge) = &report.bridge {
        if !bridge.overwritten.is_empty() {
            println!(
                "{}: overwrote {}",
                "Warning".yellow(),
                bridge.overwritten.join(", ")
            );
        }
        if !bridge.kept.is_empty() {
            println!(
                "{}: kept existing {}",
                "Warning".yellow(),
                bridge.kept.join(", ")
            );
        }
    }

    if report.globals.is_empty() {
        println!("{}", "No global functions".dimmed());
    } else {
        println!("{}: {}", "Globals".cyan(), report.globals.join(", "));
    }
}

/// Load the configured scripts and print what happened
async fn load(args: HarnessArgs) -> Result<()> {
    let config = harness_config(args)?;
    let (_injector, report) = setup(&config).await.into_diagnostic()?;

    print_report(&report);
    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Load the configured scripts, then evaluate `code`
async fn eval(code: &str, args: HarnessArgs) -> Result<()> {
    let config = harness_config(args)?;
    let (mut injector, report) = setup(&config).await.into_diagnostic()?;

    for outcome in report.results.iter().filter(|o| !o.is_success()) {
        eprintln!(
            "{}: {}: {}",
            "Warning".yellow(),
            outcome.file,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    match injector.execute_in_context(code) {
        Ok(value) => {
            if !value.is_undefined() {
                let result = injector.document_mut().display(&value);
                println!("{}", result);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Print the expansion of a pattern list
fn expand(base_dir: Option<PathBuf>, declared: bool, patterns: Vec<String>) -> Result<()> {
    let defaults = HarnessConfig::default();
    let base_dir = base_dir.unwrap_or(defaults.base_dir);
    let patterns = if patterns.is_empty() {
        defaults.files
    } else {
        patterns
    };

    let expander = FilePatternExpander::new(base_dir).with_order(order(declared));
    let expansion = expander.expand_with_report(&patterns);

    for file in &expansion.files {
        println!("{}", file.display());
    }
    for err in &expansion.invalid {
        eprintln!("{}: {}", "Error".red(), err);
    }
    if !expansion.invalid.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}
