use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use institution_pipeline::splitter;
use institution_pipeline::utils;

mod enrich;
mod extract;
mod scrape;

const DEFAULT_INPUT_CSV: &str = "all_papers.csv";
const DEFAULT_OUTPUT_DIR: &str = ".pipeline";
const INSTITUTION_COLUMN: &str = "Author_Institutions";

#[derive(Debug, Serialize, Deserialize, Clone)]
struct PipelineConfig {
    input_csv: String,
    output_dir: String,
    heuristic_cache_path: String,
    enriched_cache_path: String,
    web_cache_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let output_dir = default_output_dir();
        Self {
            input_csv: DEFAULT_INPUT_CSV.to_string(),
            output_dir: output_dir.clone(),
            heuristic_cache_path: output_path(&output_dir, "institution_locations_heuristic.csv"),
            enriched_cache_path: output_path(&output_dir, "institution_locations.csv"),
            web_cache_path: output_path(&output_dir, "institution_locations_web.csv"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipelineConfigFile {
    #[serde(default)]
    input_csv: Option<String>,
    #[serde(default)]
    output_dir: Option<String>,
    #[serde(default)]
    heuristic_cache_path: Option<String>,
    #[serde(default)]
    enriched_cache_path: Option<String>,
    #[serde(default)]
    web_cache_path: Option<String>,
}

fn default_output_dir() -> String {
    DEFAULT_OUTPUT_DIR.to_string()
}

fn output_path(output_dir: &str, entry: &str) -> String {
    Path::new(output_dir)
        .join(entry)
        .to_string_lossy()
        .to_string()
}

impl PipelineConfig {
    fn from_file(config: PipelineConfigFile) -> Self {
        let output_dir = config.output_dir.unwrap_or_else(default_output_dir);
        Self {
            input_csv: config
                .input_csv
                .unwrap_or_else(|| DEFAULT_INPUT_CSV.to_string()),
            output_dir: output_dir.clone(),
            heuristic_cache_path: config.heuristic_cache_path.unwrap_or_else(|| {
                output_path(&output_dir, "institution_locations_heuristic.csv")
            }),
            enriched_cache_path: config
                .enriched_cache_path
                .unwrap_or_else(|| output_path(&output_dir, "institution_locations.csv")),
            web_cache_path: config
                .web_cache_path
                .unwrap_or_else(|| output_path(&output_dir, "institution_locations_web.csv")),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "institution_pipeline",
    version,
    about = "Resolve raw affiliation strings to city/country locations"
)]
struct Cli {
    #[arg(long, global = true, default_value = "pipeline_config.json")]
    config: PathBuf,
    #[arg(
        long,
        global = true,
        help = "Write the resolved pipeline config to disk before running"
    )]
    write_config: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(name = "extract-cities", alias = "extract_cities")]
    ExtractCities(ExtractArgs),
    #[command(name = "enrich")]
    Enrich(EnrichArgs),
    #[command(name = "scrape-domains", alias = "scrape_domains")]
    ScrapeDomains(ScrapeArgs),
}

#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    #[arg(long, help = "Path to a CSV with an Author_Institutions column")]
    input: Option<PathBuf>,
    #[arg(long, help = "Output cache CSV path")]
    out: Option<PathBuf>,
    #[arg(long, default_value_t = 10000, help = "Progress print frequency")]
    log_every: usize,
    #[arg(
        long = "refresh-missing",
        action = clap::ArgAction::SetTrue,
        help = "Re-resolve institutions cached without a source"
    )]
    refresh_missing: bool,
}

#[derive(Args, Debug, Clone)]
struct EnrichArgs {
    #[arg(long, help = "Path to a CSV with an Author_Institutions column")]
    input: Option<PathBuf>,
    #[arg(long, help = "Cache CSV path to create/update")]
    out: Option<PathBuf>,
    #[arg(long, help = "Optional cap on number of unique institutions")]
    max: Option<usize>,
    #[arg(
        long,
        default_value_t = 0.25,
        help = "Delay between API requests (seconds)"
    )]
    sleep: f64,
    #[arg(long, default_value_t = 15.0, help = "Per-request timeout (seconds)")]
    timeout: f64,
    #[arg(
        long = "refresh-missing",
        action = clap::ArgAction::SetTrue,
        help = "Retry institutions present in cache without a source"
    )]
    refresh_missing: bool,
}

#[derive(Args, Debug, Clone)]
struct ScrapeArgs {
    #[arg(long, help = "Heuristic cache CSV to pull unresolved entries from")]
    merged: Option<PathBuf>,
    #[arg(long, help = "Output CSV path")]
    out: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = 0.25,
        help = "Delay between page fetches (seconds)"
    )]
    sleep: f64,
    #[arg(long, default_value_t = 8.0, help = "Per-request timeout (seconds)")]
    timeout: f64,
}

fn load_config(path: &Path) -> Result<PipelineConfig, String> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("Failed to read config {path:?}: {err}"))?;
        let config = serde_json::from_str::<PipelineConfigFile>(&contents)
            .map_err(|err| format!("Failed to parse config {path:?}: {err}"))?;
        Ok(PipelineConfig::from_file(config))
    } else {
        Ok(PipelineConfig::default())
    }
}

fn write_config(path: &Path, config: &PipelineConfig) -> Result<(), String> {
    let _ = utils::ensure_parent_dir(path)?;
    let contents = serde_json::to_string_pretty(config)
        .map_err(|err| format!("Failed to serialize config {path:?}: {err}"))?;
    fs::write(path, contents).map_err(|err| format!("Failed to write config {path:?}: {err}"))
}

/// Reads the affiliation column and returns the deduplicated candidate list
/// in first-seen order. A missing file or column is the one fatal error of
/// the pipeline; malformed rows are treated as having no candidates.
fn read_unique_institutions(
    csv_path: &Path,
    limit: Option<usize>,
) -> Result<Vec<String>, String> {
    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|err| format!("Failed to open input CSV {}: {err}", csv_path.display()))?;
    let headers = reader
        .headers()
        .map_err(|err| format!("Failed to read header of {}: {err}", csv_path.display()))?;
    let column = headers
        .iter()
        .position(|name| name == INSTITUTION_COLUMN)
        .ok_or_else(|| {
            format!(
                "Input CSV {} does not have column '{INSTITUTION_COLUMN}'",
                csv_path.display()
            )
        })?;

    let mut unique: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(_) => continue,
        };
        let value = record.get(column).unwrap_or_default();
        for inst in splitter::split_affiliations(value) {
            if seen.insert(inst.clone()) {
                unique.push(inst);
            }
            if let Some(limit) = limit {
                if unique.len() >= limit {
                    return Ok(unique);
                }
            }
        }
    }
    Ok(unique)
}

fn dispatch_command(command: Commands, config: &PipelineConfig) -> Result<(), String> {
    match command {
        Commands::ExtractCities(args) => extract::run_extract_cities(&args, config),
        Commands::Enrich(args) => enrich::run_enrich(&args, config),
        Commands::ScrapeDomains(args) => scrape::run_scrape_domains(&args, config),
    }
}

fn main() {
    let cli = Cli::parse();
    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = fs::create_dir_all(&config.output_dir) {
        eprintln!(
            "Failed to create output directory {:?}: {err}",
            config.output_dir
        );
        std::process::exit(1);
    }

    if cli.write_config {
        if let Err(err) = write_config(&cli.config, &config) {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }

    let Some(command) = cli.command else {
        if !cli.write_config {
            eprintln!("No subcommand supplied. Use --help for usage details.");
            std::process::exit(2);
        }
        return;
    };

    if let Err(err) = dispatch_command(command, &config) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unique_institutions_are_split_and_deduplicated() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("papers.csv");
        fs::write(
            &path,
            "Title,Author_Institutions\n\
             A,MIT; Stanford University\n\
             B,Stanford University\n\
             C,\n\
             D,unknown\n",
        )
        .expect("write fixture");
        let unique = read_unique_institutions(&path, None).expect("read");
        assert_eq!(unique, vec!["MIT", "Stanford University"]);
    }

    #[test]
    fn missing_column_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("papers.csv");
        fs::write(&path, "Title,Authors\nA,B\n").expect("write fixture");
        let err = read_unique_institutions(&path, None).unwrap_err();
        assert!(err.contains("Author_Institutions"));
    }

    #[test]
    fn rows_with_mismatched_field_counts_are_skipped() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("papers.csv");
        // The unquoted comma makes the first data row two fields wide against
        // a one-field header; only the quoted row should survive.
        fs::write(
            &path,
            "Author_Institutions\n\
             Department of Computer Science, Stanford University\n\
             \"Department of Physics, Oxford University\"\n",
        )
        .expect("write fixture");
        let unique = read_unique_institutions(&path, None).expect("read");
        assert_eq!(unique, vec!["Department of Physics, Oxford University"]);
    }

    #[test]
    fn limit_caps_the_candidate_list() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("papers.csv");
        fs::write(
            &path,
            "Author_Institutions\nMIT; Stanford University; ETH Zurich\n",
        )
        .expect("write fixture");
        let unique = read_unique_institutions(&path, Some(2)).expect("read");
        assert_eq!(unique.len(), 2);
    }
}
