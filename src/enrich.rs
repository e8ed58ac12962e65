use std::collections::HashMap;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use institution_pipeline::cache::{self, EnrichedInstitution};
use institution_pipeline::lookup;

use crate::{read_unique_institutions, EnrichArgs, PipelineConfig};

/// Directory enrichment pass: query ROR then OpenAlex for every candidate the
/// cache has not seen, with a fixed delay between requests. Lookup failures
/// become placeholder rows so the next run skips them.
pub fn run_enrich(args: &EnrichArgs, config: &PipelineConfig) -> Result<(), String> {
    let input = args
        .input
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.input_csv));
    let out = args
        .out
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.enriched_cache_path));

    let cache = cache::load_enriched_cache(out)?;
    println!("Loaded {} cached institutions", cache.len());

    let mut unique = read_unique_institutions(input, args.max)?;
    unique.sort();
    println!("Found {} unique institutions to consider", unique.len());

    let to_process: Vec<&String> = unique
        .iter()
        .filter(|name| match cache.get(name.as_str()) {
            None => true,
            Some(record) => args.refresh_missing && record.source.is_miss(),
        })
        .collect();
    println!(
        "Will query {} institutions ({} uncached/missing)",
        to_process.len(),
        if args.refresh_missing { "including" } else { "only" }
    );

    let client = lookup::build_client(Duration::from_secs_f64(args.timeout))?;
    let delay = Duration::from_secs_f64(args.sleep.max(0.0));
    let total = to_process.len();

    let mut updated: HashMap<String, EnrichedInstitution> = cache;
    for (idx, name) in to_process.iter().enumerate() {
        match lookup::enrich_institution(&client, name) {
            Some(mut record) => {
                // The cache is keyed by the raw candidate string even when a
                // lookup only succeeded with the normalized core name.
                record.institution = (*name).clone();
                println!(
                    "[{}/{total}] OK: {name} -> {} {}",
                    idx + 1,
                    if record.city.is_empty() { "?" } else { record.city.as_str() },
                    record.country_code
                );
                updated.insert((*name).clone(), record);
            }
            None => {
                println!("[{}/{total}] MISS: {name}", idx + 1);
                updated.insert((*name).clone(), EnrichedInstitution::miss(name));
            }
        }
        sleep(delay);
    }

    cache::save_enriched_cache(out, &updated)?;
    println!("Saved {} rows to {}", updated.len(), out.display());
    Ok(())
}
