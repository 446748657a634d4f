use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::ResolveError;
use crate::models::{SponsorRecord, DEFAULT_SPONSOR_CONFIDENCE};
use crate::normalize::{name_similarity, normalize};
use crate::provider::{provider_from_config, CandidateSponsor, SponsorProvider};

pub const REMOTE_SOURCE: &str = "remote_provider";

pub const SYNCED_AT_KEY: &str = "remote_synced_at";
pub const PAYLOAD_KEY: &str = "remote_payload";
pub const UPDATE_KEY: &str = "remote_update";

/// Jaro-Winkler floor for the fuzzy fallback. Names shorter than
/// `FUZZY_MIN_LEN` never match fuzzily.
const FUZZY_THRESHOLD: f64 = 0.93;
const FUZZY_MIN_LEN: usize = 5;

// --- Staleness policy ---

/// True when cached remote data is missing or at least `threshold_hours` old.
pub fn is_stale(synced_at: Option<DateTime<Utc>>, threshold_hours: i64) -> bool {
    is_stale_at(synced_at, threshold_hours, Utc::now())
}

/// A threshold too large to represent never expires synced data.
pub fn is_stale_at(synced_at: Option<DateTime<Utc>>, threshold_hours: i64, now: DateTime<Utc>) -> bool {
    let Some(synced) = synced_at else {
        return true;
    };
    match Duration::try_hours(threshold_hours) {
        Some(threshold) => now - synced >= threshold,
        None => false,
    }
}

pub fn synced_at(record: &SponsorRecord) -> Option<DateTime<Utc>> {
    record
        .metadata
        .get(SYNCED_AT_KEY)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn is_record_stale(record: &SponsorRecord, threshold_hours: i64) -> bool {
    is_stale(synced_at(record), threshold_hours)
}

// --- Local matching ---

/// Alias match, then fuzzy name match, over already-loaded records. Used when
/// the exact normalized-name lookup misses.
pub fn match_secondary<'r>(records: &'r [SponsorRecord], normalized: &str) -> Option<&'r SponsorRecord> {
    if normalized.is_empty() {
        return None;
    }

    if let Some(hit) = records
        .iter()
        .find(|r| r.aliases.iter().any(|alias| normalize(alias) == normalized))
    {
        return Some(hit);
    }

    if normalized.len() < FUZZY_MIN_LEN {
        return None;
    }

    let mut best: Option<(&SponsorRecord, f64)> = None;
    for record in records {
        let score = std::iter::once(record.normalized_name.clone())
            .chain(record.aliases.iter().map(|a| normalize(a)))
            .map(|name| name_similarity(&name, normalized))
            .fold(0.0, f64::max);
        if score >= FUZZY_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
            best = Some((record, score));
        }
    }
    if let Some((record, score)) = best {
        debug!(query = normalized, matched = %record.normalized_name, score, "Fuzzy sponsor match");
    }
    best.map(|(record, _)| record)
}

// --- Merge ---

fn pick_candidate(normalized: &str, candidates: Vec<CandidateSponsor>) -> Option<CandidateSponsor> {
    let exact = candidates
        .iter()
        .position(|c| normalize(&c.company_name) == normalized);
    let index = exact.unwrap_or(0);
    candidates.into_iter().nth(index)
}

fn union_visa_types(local: &[String], remote: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for visa in local.iter().chain(remote) {
        let visa = visa.trim();
        if visa.is_empty() {
            continue;
        }
        if !merged.iter().any(|m| m.eq_ignore_ascii_case(visa)) {
            merged.push(visa.to_string());
        }
    }
    merged.sort_by_key(|v| v.to_ascii_uppercase());
    merged
}

/// Merges a remote candidate into whatever local record exists. Remote
/// confidence, last year and update blurb win when present; visa types union.
pub fn merge_candidate(
    key: &str,
    queried_name: &str,
    local: Option<&SponsorRecord>,
    candidate: &CandidateSponsor,
    now: DateTime<Utc>,
) -> SponsorRecord {
    let company_name = local
        .map(|r| r.company_name.clone())
        .unwrap_or_else(|| candidate.company_name.clone());

    let mut aliases = local.map(|r| r.aliases.clone()).unwrap_or_default();
    for name in [candidate.company_name.as_str(), queried_name] {
        let normalized = normalize(name);
        if normalized.is_empty() || normalized == key {
            continue;
        }
        if !aliases.iter().any(|a| normalize(a) == normalized) {
            aliases.push(name.trim().to_string());
        }
    }

    let visa_types = union_visa_types(
        local.map(|r| r.visa_types.as_slice()).unwrap_or_default(),
        candidate.visa_types.as_deref().unwrap_or_default(),
    );

    let mut metadata = match local.map(|r| &r.metadata) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    metadata.insert(PAYLOAD_KEY.to_string(), candidate.raw.clone());
    metadata.insert(SYNCED_AT_KEY.to_string(), Value::String(now.to_rfc3339()));
    match &candidate.latest_update {
        Some(update) => {
            metadata.insert(
                UPDATE_KEY.to_string(),
                json!({"summary": update.summary, "timestamp": update.timestamp}),
            );
        }
        None => {
            metadata.remove(UPDATE_KEY);
        }
    }

    SponsorRecord {
        id: local.map(|r| r.id).unwrap_or_default(),
        company_name,
        normalized_name: key.to_string(),
        aliases,
        visa_types,
        last_year_sponsored: candidate
            .last_year_sponsored
            .or(local.and_then(|r| r.last_year_sponsored)),
        confidence: candidate
            .confidence
            .or(local.map(|r| r.confidence))
            .unwrap_or(DEFAULT_SPONSOR_CONFIDENCE)
            .clamp(0, 100),
        notes: candidate
            .latest_update
            .as_ref()
            .map(|u| u.summary.clone())
            .or_else(|| local.and_then(|r| r.notes.clone())),
        source: REMOTE_SOURCE.to_string(),
        metadata: Value::Object(metadata),
    }
}

// --- Resolver ---

pub struct SponsorResolver<'a> {
    db: &'a Database,
    provider: Option<Box<dyn SponsorProvider + 'a>>,
    stale_hours: i64,
}

impl<'a> SponsorResolver<'a> {
    pub fn new(
        db: &'a Database,
        provider: Option<Box<dyn SponsorProvider + 'a>>,
        stale_hours: i64,
    ) -> Self {
        Self {
            db,
            provider,
            stale_hours,
        }
    }

    pub fn from_config(db: &'a Database, config: &Config) -> Result<Self> {
        let provider = provider_from_config(config.provider.as_ref())?;
        Ok(Self::new(db, provider, config.stale_hours))
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn stale_hours(&self) -> i64 {
        self.stale_hours
    }

    pub fn is_stale(&self, record: &SponsorRecord) -> bool {
        is_record_stale(record, self.stale_hours)
    }

    /// Exact normalized-name lookup, then aliases, then the fuzzy fallback.
    pub fn find_local(&self, normalized: &str) -> Result<Option<SponsorRecord>> {
        if normalized.is_empty() {
            return Ok(None);
        }
        if let Some(record) = self.db.find_sponsor_by_normalized_name(normalized)? {
            return Ok(Some(record));
        }
        if let Some(record) = self.db.find_sponsor_by_alias(normalized)? {
            return Ok(Some(record));
        }
        let all = self.db.list_sponsors()?;
        Ok(match_secondary(&all, normalized).cloned())
    }

    /// Best-known sponsor record for a company. Remote failures fall back to
    /// local data; local storage errors, including a failed write of a
    /// refreshed record, are returned.
    pub fn resolve(&self, company_name: &str) -> Result<Option<SponsorRecord>> {
        let normalized = normalize(company_name);
        if normalized.is_empty() {
            return Ok(None);
        }

        let local = self.find_local(&normalized)?;
        if let Some(record) = &local {
            if !self.is_stale(record) {
                debug!(company = company_name, "Sponsor record is fresh");
                return Ok(local);
            }
        }

        if !self.is_configured() {
            return Ok(local);
        }

        match self.refresh(company_name, local.clone()) {
            Ok(resolved) => Ok(resolved),
            Err(ResolveError::Storage(err)) => {
                Err(err.context(format!("Failed to store sponsor record for {company_name}")))
            }
            Err(err) => {
                warn!(
                    company = company_name,
                    timeout = err.is_timeout(),
                    error = %err,
                    "Sponsor lookup failed, using local data"
                );
                Ok(local)
            }
        }
    }

    /// One remote lookup plus merge and upsert. The error covers this call only.
    pub fn refresh(
        &self,
        company_name: &str,
        local: Option<SponsorRecord>,
    ) -> Result<Option<SponsorRecord>, ResolveError> {
        let Some(provider) = &self.provider else {
            return Ok(local);
        };

        let candidates = provider.search_companies(company_name)?;
        let normalized = normalize(company_name);
        let Some(candidate) = pick_candidate(&normalized, candidates) else {
            debug!(company = company_name, "Sponsor provider returned no candidates");
            return Ok(local);
        };

        let key = local
            .as_ref()
            .map(|r| r.normalized_name.clone())
            .unwrap_or(normalized);
        let merged = merge_candidate(&key, company_name, local.as_ref(), &candidate, Utc::now());
        let stored = self.db.upsert_sponsor(&merged)?;
        info!(
            company = %stored.company_name,
            confidence = stored.confidence,
            "Refreshed sponsor record from provider"
        );
        Ok(Some(stored))
    }
}
