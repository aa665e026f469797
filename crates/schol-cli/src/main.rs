use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use schol_core::{DedupMethod, ScholarshipRecord};
use schol_pipeline::{Pipeline, PipelineConfig};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "schol-cli")]
#[command(about = "Scholarship ingestion, normalization and dedup")]
struct Cli {
    /// YAML config file; replaces environment configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and normalize one page.
    Scrape { url: String },
    /// Fetch and normalize many pages in bounded chunks.
    Batch {
        urls: Vec<String>,
        /// File with one URL per line; `#` starts a comment.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Resolve a deadline from free text.
    Deadline { text: String },
    /// Collapse near-duplicate records read from a JSON array.
    Dedup {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = DedupMethod::Hybrid)]
        method: DedupMethod,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Check a record (or an array of records) against the schema.
    Validate {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run the JSON service.
    Serve,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_yaml_file(path)?.with_env_api_key()),
        None => Ok(PipelineConfig::from_env()),
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn url_list(mut urls: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(file) = file {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        urls.extend(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if urls.is_empty() {
        bail!("no URLs given; pass them as arguments or with --file");
    }
    Ok(urls)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let pipeline = Pipeline::from_config(&config)?;

    match cli.command {
        Commands::Scrape { url } => print_json(&pipeline.scrape_and_normalize(&url).await?)?,
        Commands::Batch {
            urls,
            file,
            concurrency,
        } => {
            let urls = url_list(urls, file.as_deref())?;
            let concurrency = concurrency.unwrap_or_else(|| pipeline.default_concurrency());
            let result = pipeline.batch_scrape_and_normalize(&urls, concurrency).await?;
            print_json(&result)?;
        }
        Commands::Deadline { text } => print_json(&pipeline.parse_deadline(&text).await)?,
        Commands::Dedup {
            input,
            method,
            threshold,
        } => {
            let records: Vec<ScholarshipRecord> = serde_json::from_value(read_json(&input)?)
                .with_context(|| format!("{} is not an array of records", input.display()))?;
            print_json(&pipeline.deduplicate(records, method, threshold).await)?;
        }
        Commands::Validate { input } => match read_json(&input)? {
            serde_json::Value::Array(items) => {
                let reports: Vec<_> = items.iter().map(|item| pipeline.validate(item)).collect();
                print_json(&reports)?;
            }
            single => print_json(&pipeline.validate(&single))?,
        },
        Commands::Serve => schol_web::serve(pipeline, config.web_port).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn dedup_flags_parse() {
        let cli = Cli::parse_from([
            "schol-cli", "dedup", "--input", "records.json", "--method", "rules", "--threshold", "0.7",
        ]);
        match cli.command {
            Commands::Dedup { method, threshold, .. } => {
                assert_eq!(method, DedupMethod::Rules);
                assert_eq!(threshold, Some(0.7));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn url_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "# sources\nhttps://a.example/\n\n  https://b.example/  \n").unwrap();
        let urls = url_list(vec!["https://c.example/".into()], Some(path.as_path())).unwrap();
        assert_eq!(urls, vec!["https://c.example/", "https://a.example/", "https://b.example/"]);
        assert!(url_list(Vec::new(), None).is_err());
    }
}
