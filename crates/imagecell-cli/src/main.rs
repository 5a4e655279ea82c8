//! imagecell CLI - rewrite =@IMAGE formulas in spreadsheets

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imagecell::prelude::*;
use imagecell::{
    open_workbook, output_file_name, summarize, SheetSummary, DEFAULT_MAX_IMAGE_SIZE,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "imagecell")]
#[command(
    author,
    version,
    about = "Rewrite =@IMAGE(\"url\") formulas as IMAGE formulas or embedded pictures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every =@IMAGE formula and write the result as .xlsx
    Convert {
        /// Input spreadsheet file (xlsx, xls)
        input: PathBuf,

        /// Output file (default: next to the input, with a suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only rewrite the formulas, do not download images
        #[arg(long)]
        text_only: bool,

        /// Largest width or height of an embedded image, in pixels (50-500)
        #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_SIZE)]
        max_image_size: u32,

        /// Print the change log as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every cell with an =@IMAGE formula
    Scan {
        /// Input spreadsheet file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            text_only,
            max_image_size,
            json,
        } => {
            let options = if text_only {
                ConvertOptions::text_only()
            } else {
                ConvertOptions::embed_images(max_image_size)
            };
            run_convert(&input, output.as_deref(), &options, json)
        }
        Commands::Scan { input } => scan(&input),
    }
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    std::fs::read(input).with_context(|| format!("Failed to read '{}'", input.display()))
}

fn run_convert(
    input: &Path,
    output: Option<&Path>,
    options: &ConvertOptions,
    json: bool,
) -> Result<()> {
    let bytes = read_input(input)?;
    let result = convert(&bytes, options)
        .with_context(|| format!("Failed to convert '{}'", input.display()))?;

    if json {
        let report = serde_json::json!({
            "changes": result.changes,
            "summary": summarize(&result.changes),
        });
        let text = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
        println!("{text}");
    } else {
        print_changes(&result.changes).context("Failed to write to stdout")?;
    }

    if result.changes.is_empty() {
        eprintln!("No =@IMAGE formulas found in '{}'", input.display());
        return Ok(());
    }

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => default_output_path(input, options.mode)?,
    };
    std::fs::write(&output, &result.output)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;
    eprintln!(
        "Wrote {} changes to '{}'",
        result.changes.len(),
        output.display()
    );

    Ok(())
}

fn default_output_path(input: &Path, mode: ConversionMode) -> Result<PathBuf> {
    let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
        bail!("Cannot derive an output name from '{}'", input.display());
    };
    Ok(input.with_file_name(output_file_name(name, mode)))
}

fn print_changes(changes: &[ChangeRecord]) -> io::Result<()> {
    let mut out = io::stdout().lock();

    for change in changes {
        writeln!(
            out,
            "{}!{}\t{}\t{}\t{}",
            change.sheet, change.cell, change.action, change.url, change.status
        )?;
    }

    let summary = summarize(changes);
    if !summary.is_empty() {
        writeln!(out)?;
        print_summary(&mut out, &summary)?;
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, summary: &[SheetSummary]) -> io::Result<()> {
    let width = summary
        .iter()
        .map(|s| s.sheet.chars().count())
        .max()
        .unwrap_or(0)
        .max("Sheet".len());

    writeln!(out, "{:<width$}  {:>10}  {:>6}  {:>5}", "Sheet", "Successful", "Errors", "Total")?;
    for s in summary {
        writeln!(
            out,
            "{:<width$}  {:>10}  {:>6}  {:>5}",
            s.sheet, s.successful, s.errors, s.total
        )?;
    }
    Ok(())
}

fn scan(input: &Path) -> Result<()> {
    let bytes = read_input(input)?;
    let workbook =
        open_workbook(&bytes).with_context(|| format!("Failed to open '{}'", input.display()))?;

    let found = workbook.image_formulas();
    for formula in &found {
        println!("{}\t{}\t{}", formula.sheet, formula.address, formula.url);
    }
    eprintln!("{} =@IMAGE formulas", found.len());

    Ok(())
}
