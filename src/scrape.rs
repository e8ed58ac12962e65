use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use institution_pipeline::cache::{self, Source};
use institution_pipeline::utils;

use crate::{PipelineConfig, ScrapeArgs};

const WEB_COLUMNS: [&str; 4] = ["institution", "city", "country_hint", "source"];

static TLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(ai|com|io|pl|cn|co|org|net|de|fr|uk|ca|au|sg|jp)\b")
        .expect("valid tld regex")
});

static DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([a-z0-9\-]+\.[a-z]{2,})").expect("valid domain regex"));

static JSON_LD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*type="application/ld\+json"[^>]*>(.*?)</script>"#)
        .expect("valid json-ld regex")
});

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static CITY_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((?i:headquarters|address|contact|located in|based in))[:\s\-]*([A-Z][A-Za-z\-']+(?:\s+[A-Z][A-Za-z\-']+){0,2})",
    )
    .expect("valid city line regex")
});

pub struct WebLocation {
    pub city: String,
    pub country_hint: String,
}

/// Extracts a domain token from names like "Helm.ai" or "deeproute.ai".
pub fn looks_like_domain(name: &str) -> Option<String> {
    let name = name.trim();
    if !TLD_RE.is_match(name) {
        return None;
    }
    DOMAIN_RE
        .captures(name)
        .map(|caps| caps[1].to_lowercase())
}

fn fetch_url(client: &Client, url: &str) -> Option<String> {
    let response = client.get(url).send().ok()?;
    if response.status().as_u16() >= 400 {
        return None;
    }
    let text = response.text().ok()?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Pulls addressLocality/addressCountry from any schema.org JSON-LD block.
pub fn parse_schema_org(html: &str) -> Option<WebLocation> {
    for caps in JSON_LD_RE.captures_iter(html) {
        let block = caps[1].trim().to_string();
        let data: Value = match serde_json::from_str(&block) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let nodes: Vec<&Value> = match &data {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for node in nodes {
            let address = match node.get("address") {
                Some(addr) if addr.is_object() => addr,
                _ => continue,
            };
            let city = address
                .get("addressLocality")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            if city.is_empty() {
                continue;
            }
            let country = address
                .get("addressCountry")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            return Some(WebLocation {
                city,
                country_hint: country,
            });
        }
    }
    None
}

/// Last-resort extraction of a capitalized city after phrases like
/// "headquarters" or "based in".
pub fn parse_city_heuristic(text: &str) -> Option<String> {
    let minified = WS_RE.replace_all(text, " ");
    CITY_LINE_RE
        .captures(&minified)
        .map(|caps| caps[2].trim().to_string())
        .filter(|city| !city.is_empty())
}

fn try_scrape(client: &Client, domain: &str) -> Option<WebLocation> {
    let urls = [format!("https://{domain}"), format!("https://www.{domain}")];
    let mut html = None;
    for url in &urls {
        html = fetch_url(client, url);
        if html.is_some() {
            break;
        }
    }
    let html = html?;
    if let Some(location) = parse_schema_org(&html) {
        return Some(location);
    }
    parse_city_heuristic(&html).map(|city| WebLocation {
        city,
        country_hint: String::new(),
    })
}

/// Scrapes homepage locations for unresolved cache entries whose names look
/// like company domains.
pub fn run_scrape_domains(args: &ScrapeArgs, config: &PipelineConfig) -> Result<(), String> {
    let merged = args
        .merged
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.heuristic_cache_path));
    let out = args
        .out
        .as_deref()
        .unwrap_or_else(|| Path::new(&config.web_cache_path));

    let cache = cache::load_heuristic_cache(merged)?;
    let mut missing: Vec<String> = cache
        .values()
        .filter(|record| record.city_guess.is_empty())
        .map(|record| {
            if record.institution_core.is_empty() {
                record.institution_raw.clone()
            } else {
                record.institution_core.clone()
            }
        })
        .filter(|name| !name.is_empty())
        .collect();
    missing.sort();
    missing.dedup();

    let targets: Vec<(String, String)> = missing
        .into_iter()
        .filter_map(|name| looks_like_domain(&name).map(|domain| (name, domain)))
        .collect();
    println!("Found {} domain-like entries to scrape", targets.len());

    let client = Client::builder()
        .user_agent("Mozilla/5.0")
        .timeout(Duration::from_secs_f64(args.timeout))
        .build()
        .map_err(|err| format!("Failed to build HTTP client: {err}"))?;
    let delay = Duration::from_secs_f64(args.sleep.max(0.0));

    let mut results: Vec<(String, WebLocation, Source)> = Vec::new();
    for (name, domain) in &targets {
        if let Some(location) = try_scrape(&client, domain) {
            println!("OK: {name} -> {}", location.city);
            results.push((name.clone(), location, Source::Web(domain.clone())));
        } else {
            println!("MISS: {name}");
        }
        sleep(delay);
    }

    utils::ensure_parent_dir(out)?;
    let scraped = results.len();
    utils::write_atomic(out, |temp| {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer
            .write_record(WEB_COLUMNS)
            .map_err(|err| format!("Failed to write header: {err}"))?;
        for (name, location, source) in &results {
            let source = source.to_string();
            writer
                .write_record([
                    name.as_str(),
                    location.city.as_str(),
                    location.country_hint.as_str(),
                    source.as_str(),
                ])
                .map_err(|err| format!("Failed to write row: {err}"))?;
        }
        writer
            .flush()
            .map_err(|err| format!("Failed to flush {}: {err}", out.display()))
    })?;
    println!("Scraped {scraped} of {} domain-like entries", targets.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_detection() {
        assert_eq!(looks_like_domain("Helm.ai"), Some("helm.ai".to_string()));
        assert_eq!(
            looks_like_domain("Deeproute.ai Research"),
            Some("deeproute.ai".to_string())
        );
        assert_eq!(looks_like_domain("Stanford University"), None);
    }

    #[test]
    fn schema_org_address_is_extracted() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@type": "Organization", "address": {"addressLocality": "Palo Alto", "addressCountry": "US"}}
            </script></head></html>"#;
        let location = parse_schema_org(html).expect("address");
        assert_eq!(location.city, "Palo Alto");
        assert_eq!(location.country_hint, "US");
    }

    #[test]
    fn city_phrase_heuristic() {
        let text = "Our company is based in Shenzhen and ships worldwide.";
        assert_eq!(parse_city_heuristic(text), Some("Shenzhen".to_string()));
        assert_eq!(parse_city_heuristic("no location words here"), None);
    }
}
