use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use csfd_watchlist::fetcher::{Fetcher, HttpSource};
use csfd_watchlist::index::load_index_documents;
use csfd_watchlist::output::{write_records, OutputFormat};
use csfd_watchlist::parser::extract_record;
use csfd_watchlist::pipeline::{collect_identifiers, harvest};
use csfd_watchlist::settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "csfd_watchlist", about = "ČSFD watchlist harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read index pages, fetch every detail page and write the table
    Run {
        /// Directory holding the saved watchlist pages (*.html)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Output file (.csv or .json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format (default: from the output extension)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
        /// Max requests in flight
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,
        /// Lower bound of the pre-request pause, seconds
        #[arg(long)]
        min_delay: Option<f64>,
        /// Upper bound of the pre-request pause, seconds
        #[arg(long)]
        max_delay: Option<f64>,
        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },
    /// List the detail page URLs found in the index pages (no network)
    Urls {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Extract one saved detail page and print it as JSON
    Extract {
        /// Saved detail page
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            data_dir,
            output,
            format,
            concurrency,
            min_delay,
            max_delay,
            quiet,
        } => {
            let settings = Settings::load()?.apply(Overrides {
                data_dir,
                output,
                max_concurrency: concurrency,
                min_delay_secs: min_delay,
                max_delay_secs: max_delay,
            })?;

            let docs = load_index_documents(&settings.data_dir)?;
            let source = HttpSource::new(&settings.headers, settings.timeout())?;
            let fetcher = Fetcher::new(source, settings.fetch_config(!quiet));

            let h = harvest(&docs, &settings.origin, &fetcher).await?;
            let format = format.unwrap_or_else(|| OutputFormat::from_path(&settings.output));
            write_records(&settings.output, &h.records, format)?;

            println!(
                "Saved {} records ({} fetch failures, {} extraction issues)",
                h.records.len(),
                h.fetch_failures.len(),
                h.extraction_failures.len(),
            );
            println!(
                "  {} partial, {} dropped -> {}",
                h.partial_records(),
                h.dropped_records(),
                settings.output.display(),
            );
            for (url, err) in &h.fetch_failures {
                println!("  fetch  {}: {}", url, err);
            }
            for failure in &h.extraction_failures {
                println!("  parse  {}", failure);
            }
            Ok(())
        }
        Commands::Urls { data_dir } => {
            let settings = Settings::load()?.apply(Overrides {
                data_dir,
                ..Default::default()
            })?;
            let docs = load_index_documents(&settings.data_dir)?;
            let ids = collect_identifiers(&docs, &settings.origin)?;
            for id in &ids {
                println!("{}", id);
            }
            println!("\n{} detail pages", ids.len());
            Ok(())
        }
        Commands::Extract { file } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match extract_record(&html) {
                Ok(extraction) => {
                    println!("{}", serde_json::to_string_pretty(&extraction.record)?);
                    if let Some(failure) = extraction.failure {
                        println!("Stopped early: {}", failure);
                    }
                    Ok(())
                }
                Err(failure) => Err(anyhow::anyhow!("No record: {}", failure)),
            }
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
