use std::collections::HashMap;
use std::path::Path;

use institution_pipeline::cache::{self, HeuristicRecord, Source};
use institution_pipeline::{normalize, resolver};

use crate::{read_unique_institutions, ExtractArgs, PipelineConfig};

/// Heuristic batch pass: split and dedup the affiliation column, resolve each
/// new candidate with the in-memory heuristics, and rewrite the cache.
pub fn run_extract_cities(args: &ExtractArgs, config: &PipelineConfig) -> Result<(), String> {
    let input = args
        .input
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.input_csv));
    let out = args
        .out
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.heuristic_cache_path));

    let cache = cache::load_heuristic_cache(out)?;
    println!("Loaded {} cached institutions", cache.len());

    let unique = read_unique_institutions(input, None)?;
    println!("Total split entries: {}", unique.len());

    let to_process: Vec<&String> = unique
        .iter()
        .filter(|name| match cache.get(name.as_str()) {
            None => true,
            Some(record) => args.refresh_missing && record.source.is_miss(),
        })
        .collect();
    let total = to_process.len();
    println!("Will resolve {total} institutions");

    let mut updated: HashMap<String, HeuristicRecord> = cache;
    for (idx, inst) in to_process.iter().enumerate() {
        let mut core = normalize::core_name(inst);
        if normalize::is_noise_name(&core) {
            core.clear();
        }
        let (city, country_hint) = resolver::resolve(inst, &core);
        let source = if city.is_empty() && country_hint.is_empty() {
            Source::Miss
        } else {
            Source::Heuristic
        };
        updated.insert(
            (*inst).clone(),
            HeuristicRecord {
                institution_raw: (*inst).clone(),
                institution_core: core,
                city_guess: city,
                country_hint,
                source,
            },
        );
        if args.log_every > 0 && (idx + 1) % args.log_every == 0 {
            println!("Processed {}/{} (remaining {})", idx + 1, total, total - idx - 1);
        }
    }

    cache::save_heuristic_cache(out, &updated)?;
    let with_city = updated
        .values()
        .filter(|record| !record.city_guess.is_empty())
        .count();
    let percent = if updated.is_empty() {
        0.0
    } else {
        with_city as f64 * 100.0 / updated.len() as f64
    };
    println!(
        "Wrote {} rows to {}; with city guesses: {with_city} ({percent:.1}%)",
        updated.len(),
        out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> PipelineConfig {
        let path = |name: &str| dir.path().join(name).to_string_lossy().to_string();
        PipelineConfig {
            input_csv: path("papers.csv"),
            output_dir: dir.path().to_string_lossy().to_string(),
            heuristic_cache_path: path("heuristic.csv"),
            enriched_cache_path: path("enriched.csv"),
            web_cache_path: path("web.csv"),
        }
    }

    #[test]
    fn cached_misses_are_retried_only_with_refresh() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        // Lowercase gibberish: no city pattern, no country token, no alias.
        std::fs::write(&config.input_csv, "Author_Institutions\nzzqy qwkj\n")
            .expect("write fixture");
        let args = ExtractArgs {
            input: None,
            out: None,
            log_every: 0,
            refresh_missing: false,
        };
        run_extract_cities(&args, &config).expect("first run");

        let out = Path::new(&config.heuristic_cache_path);
        let mut cached = cache::load_heuristic_cache(out).expect("load");
        assert!(cached["zzqy qwkj"].source.is_miss());

        // Mark the row so a re-resolution is observable.
        cached.get_mut("zzqy qwkj").expect("row").institution_core = "SENTINEL".to_string();
        cache::save_heuristic_cache(out, &cached).expect("save");

        run_extract_cities(&args, &config).expect("second run");
        let cached = cache::load_heuristic_cache(out).expect("load");
        assert_eq!(cached["zzqy qwkj"].institution_core, "SENTINEL");

        let refresh = ExtractArgs {
            refresh_missing: true,
            ..args
        };
        run_extract_cities(&refresh, &config).expect("refresh run");
        let cached = cache::load_heuristic_cache(out).expect("load");
        assert_eq!(cached["zzqy qwkj"].institution_core, "zzqy qwkj");
    }

    #[test]
    fn resolved_rows_carry_the_heuristic_source() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_in(&dir);
        std::fs::write(
            &config.input_csv,
            "Author_Institutions\n\"Department of Computer Science, Stanford University\"\n",
        )
        .expect("write fixture");
        let args = ExtractArgs {
            input: None,
            out: None,
            log_every: 0,
            refresh_missing: false,
        };
        run_extract_cities(&args, &config).expect("run");
        let cached = cache::load_heuristic_cache(Path::new(&config.heuristic_cache_path))
            .expect("load");
        let row = &cached["Department of Computer Science, Stanford University"];
        assert_eq!(row.institution_core, "Stanford University");
        assert_eq!(row.city_guess, "Stanford");
        assert_eq!(row.country_hint, "US");
        assert_eq!(row.source, Source::Heuristic);
    }
}
