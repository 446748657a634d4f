use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ResolveError;

// --- Provider trait ---

pub trait SponsorProvider {
    fn search_companies(&self, query: &str) -> Result<Vec<CandidateSponsor>, ResolveError>;
}

impl<T: SponsorProvider + ?Sized> SponsorProvider for &T {
    fn search_companies(&self, query: &str) -> Result<Vec<CandidateSponsor>, ResolveError> {
        (**self).search_companies(query)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestUpdate {
    pub summary: String,
    pub timestamp: Option<String>,
}

/// One company match returned by the remote provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSponsor {
    pub company_name: String,
    pub confidence: Option<i64>,
    pub last_year_sponsored: Option<i32>,
    pub visa_types: Option<Vec<String>>,
    pub latest_update: Option<LatestUpdate>,
    /// The candidate exactly as the provider sent it, cached in sponsor metadata.
    pub raw: Value,
}

impl CandidateSponsor {
    pub fn named(name: &str) -> Self {
        Self {
            company_name: name.to_string(),
            confidence: None,
            last_year_sponsored: None,
            visa_types: None,
            latest_update: None,
            raw: Value::Object(Map::new()),
        }
    }
}

// --- Schema coercion table ---
//
// Providers disagree on field names. Each logical attribute lists the names it
// may appear under, tried in order; the first present, well-typed one wins.

const RESULT_LIST_FIELDS: &[&str] = &["results", "data", "companies", "items", "matches"];
const COMPANY_NAME_FIELDS: &[&str] = &[
    "company_name",
    "companyName",
    "employer_name",
    "employerName",
    "name",
    "company",
];
const CONFIDENCE_FIELDS: &[&str] = &[
    "confidence",
    "confidence_score",
    "confidenceScore",
    "sponsorship_score",
    "sponsorshipScore",
    "score",
];
const LAST_YEAR_FIELDS: &[&str] = &[
    "last_year_sponsored",
    "lastYearSponsored",
    "last_sponsored_year",
    "lastSponsoredYear",
    "latest_year",
    "year",
];
const VISA_TYPE_FIELDS: &[&str] = &["visa_types", "visaTypes", "visas", "visa_classes", "visaClasses"];
const VISA_ENTRY_FIELDS: &[&str] = &["type", "visa_type", "visaType", "name", "code"];
const UPDATE_FIELDS: &[&str] = &["latest_update", "latestUpdate", "last_update", "lastUpdate", "update"];
const UPDATE_SUMMARY_FIELDS: &[&str] = &["summary", "text", "title", "description", "message"];
const UPDATE_TIME_FIELDS: &[&str] = &[
    "timestamp",
    "updated_at",
    "updatedAt",
    "date",
    "published_at",
    "publishedAt",
];

fn first_field<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| obj.get(*field))
        .find(|v| !v.is_null())
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn first_string(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(coerce_string)
}

/// Confidence on a 0-100 scale. Fractional values at or below 1.0 are read as
/// a 0-1 probability.
fn coerce_confidence(obj: &Map<String, Value>) -> Option<i64> {
    let raw = CONFIDENCE_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(coerce_f64)?;
    let scaled = if raw.fract() != 0.0 && (0.0..=1.0).contains(&raw) {
        raw * 100.0
    } else {
        raw
    };
    Some(scaled.round().clamp(0.0, 100.0) as i64)
}

fn coerce_year(obj: &Map<String, Value>) -> Option<i32> {
    LAST_YEAR_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(|v| match v {
            // "2023-10-01" style dates carry the year up front
            Value::String(s) => s.trim().get(..4).and_then(|y| y.parse().ok()),
            other => coerce_f64(other).map(|y| y as i32),
        })
        .filter(|year| (1900..=2100).contains(year))
}

fn coerce_visa_types(obj: &Map<String, Value>) -> Option<Vec<String>> {
    let value = first_field(obj, VISA_TYPE_FIELDS)?;
    let types: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(entry) => first_string(entry, VISA_ENTRY_FIELDS),
                other => coerce_string(other),
            })
            .collect(),
        Value::String(s) => s
            .split([',', ';', '/'])
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => return None,
    };
    Some(types)
}

fn coerce_update(obj: &Map<String, Value>) -> Option<LatestUpdate> {
    match first_field(obj, UPDATE_FIELDS)? {
        Value::String(s) if !s.trim().is_empty() => Some(LatestUpdate {
            summary: s.trim().to_string(),
            timestamp: None,
        }),
        Value::Object(update) => Some(LatestUpdate {
            summary: first_string(update, UPDATE_SUMMARY_FIELDS)?,
            timestamp: first_string(update, UPDATE_TIME_FIELDS),
        }),
        _ => None,
    }
}

pub fn coerce_candidate(value: &Value) -> Option<CandidateSponsor> {
    let obj = value.as_object()?;
    Some(CandidateSponsor {
        company_name: first_string(obj, COMPANY_NAME_FIELDS)?,
        confidence: coerce_confidence(obj),
        last_year_sponsored: coerce_year(obj),
        visa_types: coerce_visa_types(obj),
        latest_update: coerce_update(obj),
        raw: value.clone(),
    })
}

/// Pulls the candidate list out of a provider response body, which may be a
/// bare array, an object wrapping one, or a single company object.
pub fn parse_candidates(body: &Value) -> Result<Vec<CandidateSponsor>, ResolveError> {
    let items: Vec<&Value> = match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match first_field(obj, RESULT_LIST_FIELDS) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(_) => {
                return Err(ResolveError::Malformed(
                    "result list field is not an array".to_string(),
                ));
            }
            None if first_string(obj, COMPANY_NAME_FIELDS).is_some() => vec![body],
            None => Vec::new(),
        },
        _ => {
            return Err(ResolveError::Malformed(format!(
                "unexpected top-level JSON type: {body}"
            )));
        }
    };

    Ok(items.into_iter().filter_map(coerce_candidate).collect())
}

// --- HTTP provider ---

#[derive(Debug)]
pub struct HttpSponsorProvider {
    config: ProviderConfig,
    client: reqwest::blocking::Client,
}

impl HttpSponsorProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .context("Failed to create sponsor provider HTTP client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/companies/search") {
            base.to_string()
        } else {
            format!("{}/companies/search", base)
        }
    }
}

impl SponsorProvider for HttpSponsorProvider {
    fn search_companies(&self, query: &str) -> Result<Vec<CandidateSponsor>, ResolveError> {
        debug!(query, "Querying sponsor provider");
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("q", query)])
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Accept", "application/json")
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ResolveError::Status { status, body });
        }

        let body: Value = response
            .json()
            .map_err(|e| ResolveError::Malformed(e.to_string()))?;
        parse_candidates(&body)
    }
}

/// `None` when no provider is configured; remote lookups are then skipped.
pub fn provider_from_config(
    config: Option<&ProviderConfig>,
) -> Result<Option<Box<dyn SponsorProvider>>> {
    match config {
        Some(config) if config.is_configured() => {
            Ok(Some(Box::new(HttpSponsorProvider::new(config.clone())?)))
        }
        _ => Ok(None),
    }
}
