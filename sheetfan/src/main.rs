use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use sheetfan_core::config::parse_column;
use sheetfan_core::{
    DEFAULT_DUMMY_PREFIX, ExistingSheetPolicy, RunOptions, TargetOrder, Templater,
    TemplaterConfig,
};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod formatter;

#[derive(Parser)]
#[command(name = "sheetfan")]
#[command(about = "Copy a template sheet per group and fan its formulas into a pivot sheet")]
#[command(version)]
struct Cli {
    /// Path to the XLSX workbook to edit
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Save to this file instead of overwriting the input
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Group names, one sheet per group
    #[arg(short, long, value_name = "NAME", num_args = 1..)]
    groups: Option<Vec<String>>,

    /// Name of the template sheet
    #[arg(long, value_name = "NAME")]
    template: Option<String>,

    /// Name of the pivot sheet
    #[arg(long, value_name = "NAME")]
    pivot: Option<String>,

    /// Name of the sheet that is never modified
    #[arg(long, value_name = "NAME", conflicts_with = "no_hidden")]
    hidden: Option<String>,

    /// Do not reserve any hidden sheet
    #[arg(long)]
    no_hidden: bool,

    /// First row to harvest (1-based)
    #[arg(long, value_name = "N")]
    start_row: Option<u32>,

    /// Row where harvesting stops (exclusive)
    #[arg(long, value_name = "N")]
    max_row: Option<u32>,

    /// Column holding the source formulas (number or letters)
    #[arg(long, value_name = "COL", value_parser = column_arg)]
    source_column: Option<u32>,

    /// First destination column (number or letters)
    #[arg(long, value_name = "COL", value_parser = column_arg)]
    start_column: Option<u32>,

    /// Row receiving the sheet name labels
    #[arg(long, value_name = "N")]
    header_row: Option<u32>,

    /// What to do when a group sheet already exists
    #[arg(long, value_enum)]
    on_existing: Option<OnExisting>,

    /// Order of the pivot columns
    #[arg(long, value_enum)]
    target_order: Option<Order>,

    /// Create N test sheets from the template before duplicating
    #[arg(long, value_name = "N", default_value_t = 0)]
    dummy_sheets: usize,

    /// Name prefix of the test sheets
    #[arg(long, value_name = "PREFIX", default_value = DEFAULT_DUMMY_PREFIX)]
    dummy_prefix: String,

    /// Run every step without saving
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnExisting {
    Skip,
    Overwrite,
    Error,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Groups,
    Workbook,
}

fn column_arg(value: &str) -> Result<u32, String> {
    parse_column(value).ok_or_else(|| format!("'{}' is not a column number or letters", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = apply_overrides(load_config(&cli)?, &cli);
    config.validate().context("Invalid configuration")?;

    let templater = Templater::with_config(config);
    let options = RunOptions {
        dry_run: cli.dry_run,
        dummy_sheets: cli.dummy_sheets,
        dummy_prefix: cli.dummy_prefix.clone(),
    };

    let summary = templater
        .run_with(&options)
        .with_context(|| format!("Failed to process {}", templater.config().file.display()))?;

    match cli.format {
        OutputFormat::Human => formatter::print_human(&summary),
        OutputFormat::Json => formatter::print_json(&summary)?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<TemplaterConfig> {
    if let Some(config_path) = &cli.config {
        debug!(path = %config_path.display(), "loading configuration");
        return TemplaterConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    // Fall back to a config in the current directory, then to the defaults
    let default_config_path = PathBuf::from("sheetfan.toml");
    if default_config_path.exists() {
        debug!(path = %default_config_path.display(), "loading configuration");
        TemplaterConfig::from_file(&default_config_path).with_context(|| {
            format!(
                "Failed to load config from {}",
                default_config_path.display()
            )
        })
    } else {
        Ok(TemplaterConfig::default())
    }
}

fn apply_overrides(mut config: TemplaterConfig, cli: &Cli) -> TemplaterConfig {
    if let Some(file) = &cli.file {
        config.file = file.clone();
    }
    if let Some(output) = &cli.output {
        config.output = Some(output.clone());
    }
    if let Some(groups) = &cli.groups {
        config.groups = groups.clone();
    }
    if let Some(template) = &cli.template {
        config.template_sheet = template.clone();
    }
    if let Some(pivot) = &cli.pivot {
        config.pivot_sheet = pivot.clone();
    }
    if let Some(hidden) = &cli.hidden {
        config.hidden_sheet = Some(hidden.clone());
    }
    if cli.no_hidden {
        config.hidden_sheet = None;
    }
    if let Some(row) = cli.start_row {
        config.start_row = row;
    }
    if let Some(row) = cli.max_row {
        config.max_row = row;
    }
    if let Some(column) = cli.source_column {
        config.source_column = column;
    }
    if let Some(column) = cli.start_column {
        config.start_column = column;
    }
    if let Some(row) = cli.header_row {
        config.header_row = row;
    }
    if let Some(policy) = cli.on_existing {
        config.on_existing = match policy {
            OnExisting::Skip => ExistingSheetPolicy::Skip,
            OnExisting::Overwrite => ExistingSheetPolicy::Overwrite,
            OnExisting::Error => ExistingSheetPolicy::Error,
        };
    }
    if let Some(order) = cli.target_order {
        config.target_order = match order {
            Order::Groups => TargetOrder::Groups,
            Order::Workbook => TargetOrder::Workbook,
        };
    }
    config
}

/// Logs go to stderr so JSON on stdout stays parseable
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
