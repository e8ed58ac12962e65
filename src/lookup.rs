use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

use crate::cache::{EnrichedInstitution, Source};
use crate::normalize;

pub const ROR_SEARCH_URL: &str = "https://api.ror.org/organizations";
pub const OPENALEX_SEARCH_URL: &str = "https://api.openalex.org/institutions";

pub fn build_client(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .user_agent("institution_pipeline/0.1")
        .timeout(timeout)
        .build()
        .map_err(|err| format!("Failed to build HTTP client: {err}"))
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Queries the ROR organization registry for a name. Returns the top-ranked
/// item; any network, status, or parse problem is a plain `None`.
pub fn query_ror(client: &Client, name: &str) -> Option<EnrichedInstitution> {
    let response = client
        .get(ROR_SEARCH_URL)
        .query(&[("query", name)])
        .send()
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let payload: Value = response.json().ok()?;
    let best = payload.get("items")?.as_array()?.first()?;
    let matched_name = best.get("name").and_then(Value::as_str).unwrap_or_default();
    let score = best.get("score").and_then(value_to_f64).unwrap_or(0.0);
    let ror_id = best.get("id").and_then(Value::as_str).unwrap_or_default();

    let mut city = String::new();
    let mut country_code = String::new();
    let mut latitude = None;
    let mut longitude = None;
    if let Some(addr) = best
        .get("addresses")
        .and_then(Value::as_array)
        .and_then(|addresses| addresses.first())
    {
        city = addr
            .get("city")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                addr.get("geonames_city")
                    .and_then(|geo| geo.get("city"))
                    .and_then(Value::as_str)
            })
            .unwrap_or_default()
            .to_string();
        country_code = best
            .get("country")
            .and_then(|c| c.get("country_code"))
            .and_then(Value::as_str)
            .or_else(|| addr.get("country_code").and_then(Value::as_str))
            .unwrap_or_default()
            .to_uppercase();
        latitude = addr
            .get("lat")
            .and_then(value_to_f64)
            .or_else(|| addr.get("latitude").and_then(value_to_f64));
        longitude = addr
            .get("lng")
            .and_then(value_to_f64)
            .or_else(|| addr.get("longitude").and_then(value_to_f64));
    }

    Some(EnrichedInstitution {
        institution: name.to_string(),
        matched_name: matched_name.to_string(),
        city,
        country_code,
        latitude,
        longitude,
        source: Source::Ror,
        ror_id: ror_id.to_string(),
        openalex_id: String::new(),
        score,
    })
}

/// Queries the OpenAlex institution index for a name.
pub fn query_openalex(client: &Client, name: &str) -> Option<EnrichedInstitution> {
    let response = client
        .get(OPENALEX_SEARCH_URL)
        .query(&[("search", name), ("per-page", "1")])
        .send()
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let payload: Value = response.json().ok()?;
    let best = payload.get("results")?.as_array()?.first()?;
    let matched_name = best
        .get("display_name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let openalex_id = best.get("id").and_then(Value::as_str).unwrap_or_default();
    let country_code = best
        .get("country_code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase();
    let geo = best.get("geo");
    let latitude = geo
        .and_then(|g| g.get("latitude"))
        .and_then(value_to_f64);
    let longitude = geo
        .and_then(|g| g.get("longitude"))
        .and_then(value_to_f64);
    let city = geo
        .and_then(|g| g.get("city"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            best.get("display_name_international")
                .and_then(|names| names.get("en"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default();

    Some(EnrichedInstitution {
        institution: name.to_string(),
        matched_name: matched_name.to_string(),
        city: city.to_string(),
        country_code,
        latitude,
        longitude,
        source: Source::OpenAlex,
        ror_id: String::new(),
        openalex_id: openalex_id.to_string(),
        score: 0.0,
    })
}

/// Resolution order for one candidate: ROR (accepted only with a city or
/// coordinates), OpenAlex, then both again with the normalized core name.
/// `None` means the candidate missed everywhere.
pub fn enrich_institution(client: &Client, name: &str) -> Option<EnrichedInstitution> {
    if let Some(record) = query_ror(client, name) {
        if record.has_location() {
            return Some(record);
        }
    }
    if let Some(record) = query_openalex(client, name) {
        return Some(record);
    }
    let core = normalize::core_name(name);
    if !core.is_empty() && core != name {
        if let Some(record) = query_ror(client, &core) {
            if record.has_location() {
                return Some(record);
            }
        }
        if let Some(record) = query_openalex(client, &core) {
            return Some(record);
        }
    }
    None
}
