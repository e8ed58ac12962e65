use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::utils;

pub const HEURISTIC_COLUMNS: [&str; 5] = [
    "institution_raw",
    "institution_core",
    "city_guess",
    "country_hint",
    "source",
];

pub const ENRICHED_COLUMNS: [&str; 11] = [
    "institution",
    "matched_name",
    "city",
    "country_code",
    "latitude",
    "longitude",
    "source",
    "ror_id",
    "openalex_id",
    "score",
    "updated_at",
];

/// Which resolution stage produced a cache row. `Miss` is serialized as the
/// empty string and marks a candidate that was looked up and found nothing;
/// it is a terminal negative result, distinct from "not in the cache at all",
/// so repeated runs do not waste lookups unless `--refresh-missing` asks for
/// a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Miss,
    Heuristic,
    Ror,
    OpenAlex,
    Web(String),
    Other(String),
}

impl Source {
    pub fn is_miss(&self) -> bool {
        matches!(self, Source::Miss)
    }

    pub fn parse(label: &str) -> Source {
        let label = label.trim();
        match label {
            "" => Source::Miss,
            "heuristic" => Source::Heuristic,
            "ror" => Source::Ror,
            "openalex" => Source::OpenAlex,
            other => match other.strip_prefix("web:") {
                Some(domain) => Source::Web(domain.to_string()),
                None => Source::Other(other.to_string()),
            },
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Miss => Ok(()),
            Source::Heuristic => write!(f, "heuristic"),
            Source::Ror => write!(f, "ror"),
            Source::OpenAlex => write!(f, "openalex"),
            Source::Web(domain) => write!(f, "web:{domain}"),
            Source::Other(label) => write!(f, "{label}"),
        }
    }
}

/// One row of the heuristic cache, keyed by the raw candidate string.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicRecord {
    pub institution_raw: String,
    pub institution_core: String,
    pub city_guess: String,
    pub country_hint: String,
    pub source: Source,
}

/// One row of the directory-enriched cache.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedInstitution {
    pub institution: String,
    pub matched_name: String,
    pub city: String,
    pub country_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source: Source,
    pub ror_id: String,
    pub openalex_id: String,
    pub score: f64,
}

impl EnrichedInstitution {
    /// Placeholder written after a failed lookup so the next run skips it.
    pub fn miss(institution: &str) -> Self {
        Self {
            institution: institution.to_string(),
            matched_name: String::new(),
            city: String::new(),
            country_code: String::new(),
            latitude: None,
            longitude: None,
            source: Source::Miss,
            ror_id: String::new(),
            openalex_id: String::new(),
            score: 0.0,
        }
    }

    pub fn has_location(&self) -> bool {
        !self.city.is_empty() || (self.latitude.is_some() && self.longitude.is_some())
    }
}

#[derive(Debug, Deserialize)]
struct RawHeuristicRow {
    #[serde(default)]
    institution_raw: String,
    #[serde(default)]
    institution_core: String,
    #[serde(default)]
    city_guess: String,
    #[serde(default)]
    country_hint: String,
    #[serde(default)]
    source: String,
}

#[derive(Debug, Deserialize)]
struct RawEnrichedRow {
    #[serde(default)]
    institution: String,
    #[serde(default)]
    matched_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    latitude: String,
    #[serde(default)]
    longitude: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    ror_id: String,
    #[serde(default)]
    openalex_id: String,
    #[serde(default)]
    score: String,
}

fn parse_opt_float(field: &str) -> Result<Option<f64>, ()> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    field.parse::<f64>().map(Some).map_err(|_| ())
}

pub fn load_heuristic_cache(path: &Path) -> Result<HashMap<String, HeuristicRecord>, String> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| format!("Failed to open cache {}: {err}", path.display()))?;
    let mut cache = HashMap::new();
    for row in reader.deserialize::<RawHeuristicRow>() {
        // Legacy or corrupt rows are skipped, never fatal.
        let row = match row {
            Ok(row) => row,
            Err(_) => continue,
        };
        if row.institution_raw.is_empty() {
            continue;
        }
        cache.insert(
            row.institution_raw.clone(),
            HeuristicRecord {
                institution_raw: row.institution_raw,
                institution_core: row.institution_core,
                city_guess: row.city_guess,
                country_hint: row.country_hint,
                source: Source::parse(&row.source),
            },
        );
    }
    Ok(cache)
}

pub fn save_heuristic_cache(
    path: &Path,
    cache: &HashMap<String, HeuristicRecord>,
) -> Result<(), String> {
    utils::ensure_parent_dir(path)?;
    let mut rows: Vec<&HeuristicRecord> = cache.values().collect();
    rows.sort_by(|a, b| a.institution_raw.cmp(&b.institution_raw));
    utils::write_atomic(path, |temp| {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer
            .write_record(HEURISTIC_COLUMNS)
            .map_err(|err| format!("Failed to write cache header: {err}"))?;
        for row in &rows {
            let source = row.source.to_string();
            writer
                .write_record([
                    row.institution_raw.as_str(),
                    row.institution_core.as_str(),
                    row.city_guess.as_str(),
                    row.country_hint.as_str(),
                    source.as_str(),
                ])
                .map_err(|err| format!("Failed to write cache row: {err}"))?;
        }
        writer
            .flush()
            .map_err(|err| format!("Failed to flush cache: {err}"))
    })
}

pub fn load_enriched_cache(path: &Path) -> Result<HashMap<String, EnrichedInstitution>, String> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| format!("Failed to open cache {}: {err}", path.display()))?;
    let mut cache = HashMap::new();
    for row in reader.deserialize::<RawEnrichedRow>() {
        let row = match row {
            Ok(row) => row,
            Err(_) => continue,
        };
        if row.institution.is_empty() {
            continue;
        }
        // Malformed float fields mark a legacy row; skip it rather than fail.
        let latitude = match parse_opt_float(&row.latitude) {
            Ok(value) => value,
            Err(()) => continue,
        };
        let longitude = match parse_opt_float(&row.longitude) {
            Ok(value) => value,
            Err(()) => continue,
        };
        let score = match parse_opt_float(&row.score) {
            Ok(value) => value.unwrap_or(0.0),
            Err(()) => continue,
        };
        cache.insert(
            row.institution.clone(),
            EnrichedInstitution {
                institution: row.institution,
                matched_name: row.matched_name,
                city: row.city,
                country_code: row.country_code,
                latitude,
                longitude,
                source: Source::parse(&row.source),
                ror_id: row.ror_id,
                openalex_id: row.openalex_id,
                score,
            },
        );
    }
    Ok(cache)
}

pub fn save_enriched_cache(
    path: &Path,
    cache: &HashMap<String, EnrichedInstitution>,
) -> Result<(), String> {
    utils::ensure_parent_dir(path)?;
    let mut rows: Vec<&EnrichedInstitution> = cache.values().collect();
    rows.sort_by(|a, b| a.institution.cmp(&b.institution));
    let updated_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    utils::write_atomic(path, |temp| {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer
            .write_record(ENRICHED_COLUMNS)
            .map_err(|err| format!("Failed to write cache header: {err}"))?;
        for row in &rows {
            let latitude = row.latitude.map(|v| v.to_string()).unwrap_or_default();
            let longitude = row.longitude.map(|v| v.to_string()).unwrap_or_default();
            let source = row.source.to_string();
            let score = row.score.to_string();
            writer
                .write_record([
                    row.institution.as_str(),
                    row.matched_name.as_str(),
                    row.city.as_str(),
                    row.country_code.as_str(),
                    latitude.as_str(),
                    longitude.as_str(),
                    source.as_str(),
                    row.ror_id.as_str(),
                    row.openalex_id.as_str(),
                    score.as_str(),
                    updated_at.as_str(),
                ])
                .map_err(|err| format!("Failed to write cache row: {err}"))?;
        }
        writer
            .flush()
            .map_err(|err| format!("Failed to flush cache: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_enriched() -> EnrichedInstitution {
        EnrichedInstitution {
            institution: "ETH Zurich".to_string(),
            matched_name: "ETH Zurich".to_string(),
            city: "Zurich".to_string(),
            country_code: "CH".to_string(),
            latitude: Some(47.3769),
            longitude: Some(8.5417),
            source: Source::Ror,
            ror_id: "https://ror.org/05a28rw58".to_string(),
            openalex_id: String::new(),
            score: 0.95,
        }
    }

    #[test]
    fn source_labels_round_trip() {
        for source in [
            Source::Miss,
            Source::Heuristic,
            Source::Ror,
            Source::OpenAlex,
            Source::Web("helm.ai".to_string()),
        ] {
            assert_eq!(Source::parse(&source.to_string()), source);
        }
        assert_eq!(Source::parse("  "), Source::Miss);
    }

    #[test]
    fn heuristic_cache_round_trips_including_misses() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("heuristic.csv");
        let mut cache = HashMap::new();
        cache.insert(
            "Stanford University".to_string(),
            HeuristicRecord {
                institution_raw: "Stanford University".to_string(),
                institution_core: "Stanford University".to_string(),
                city_guess: "Stanford".to_string(),
                country_hint: "US".to_string(),
                source: Source::Heuristic,
            },
        );
        cache.insert(
            "Mystery Org".to_string(),
            HeuristicRecord {
                institution_raw: "Mystery Org".to_string(),
                institution_core: "Mystery Org".to_string(),
                city_guess: String::new(),
                country_hint: String::new(),
                source: Source::Miss,
            },
        );
        save_heuristic_cache(&path, &cache).expect("save cache");
        let loaded = load_heuristic_cache(&path).expect("load cache");
        assert_eq!(loaded, cache);
        assert!(loaded["Mystery Org"].source.is_miss());
    }

    #[test]
    fn enriched_cache_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("enriched.csv");
        let mut cache = HashMap::new();
        cache.insert("ETH Zurich".to_string(), sample_enriched());
        cache.insert(
            "Mystery Org".to_string(),
            EnrichedInstitution::miss("Mystery Org"),
        );
        save_enriched_cache(&path, &cache).expect("save cache");
        let loaded = load_enriched_cache(&path).expect("load cache");
        assert_eq!(loaded, cache);
    }

    #[test]
    fn saving_twice_is_idempotent_modulo_timestamp() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("enriched.csv");
        let mut cache = HashMap::new();
        cache.insert("ETH Zurich".to_string(), sample_enriched());
        save_enriched_cache(&path, &cache).expect("first save");
        let first = load_enriched_cache(&path).expect("first load");
        save_enriched_cache(&path, &first).expect("second save");
        let second = load_enriched_cache(&path).expect("second load");
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("enriched.csv");
        let contents = "institution,matched_name,city,country_code,latitude,longitude,source,ror_id,openalex_id,score,updated_at\n\
            Good Org,Good Org,Bern,CH,46.9,7.4,ror,,,1.0,2024-01-01T00:00:00Z\n\
            Bad Org,Bad Org,Bern,CH,not-a-float,7.4,ror,,,1.0,2024-01-01T00:00:00Z\n";
        std::fs::write(&path, contents).expect("write fixture");
        let loaded = load_enriched_cache(&path).expect("load cache");
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("Good Org"));
    }
}
