//! Output formatters for run summaries

use anyhow::Result;
use colored::*;
use sheetfan_core::RunSummary;

/// Print a run summary in human-readable format with colors
pub fn print_human(summary: &RunSummary) {
    println!("{}", format!("Workbook: {}", summary.file.display()).bold());
    println!();

    if !summary.dummy_sheets.is_empty() {
        println!("{}", "Test sheets:".bold().underline());
        println!("  {}", summary.dummy_sheets.join(", ").bright_black());
        println!();
    }

    let duplication = &summary.duplication;
    println!("{}", "Sheets:".bold().underline());
    for name in &duplication.created {
        println!("  {} {}", "CREATED".green().bold(), name.cyan());
    }
    for name in &duplication.overwritten {
        println!("  {} {}", "REPLACED".yellow().bold(), name.cyan());
    }
    for name in &duplication.skipped {
        println!("  {} {}", "SKIPPED".bright_black().bold(), name.cyan());
    }
    if duplication.created.is_empty()
        && duplication.overwritten.is_empty()
        && duplication.skipped.is_empty()
    {
        println!("  {}", "no groups".bright_black());
    }
    println!();

    let propagation = &summary.propagation;
    println!("{}", "Pivot columns:".bold().underline());
    for column in &propagation.columns {
        println!("  {} {}", column.column.yellow().bold(), column.sheet.cyan());
    }
    for name in &propagation.skipped {
        println!("  {} {}", "-".bright_black(), name.bright_black());
    }
    println!();

    println!("{}", "Summary:".bold().underline());
    println!("  {} {}", "Rows harvested:".bold(), summary.harvested);
    println!("  {} {}", "Cells written:".bold(), propagation.cells_written);
    match &summary.output {
        Some(path) => println!(
            "{}",
            format!("✓ Saved to {}", path.display()).green().bold()
        ),
        None => println!("{}", "Dry run, nothing saved".yellow().bold()),
    }
}

/// Print a run summary in JSON format
pub fn print_json(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
