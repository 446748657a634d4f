use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{EnrichedPosting, JobPosting, ScoredPosting, SponsorRecord, SponsorSummary};
use crate::normalize::normalize;
use crate::sponsor::{match_secondary, SponsorResolver, UPDATE_KEY};

pub fn summarize(record: &SponsorRecord) -> SponsorSummary {
    let latest_update = record
        .metadata
        .get(UPDATE_KEY)
        .and_then(|u| u.get("summary"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| record.notes.clone());

    SponsorSummary {
        company_name: record.company_name.clone(),
        confidence: record.confidence,
        last_year_sponsored: record.last_year_sponsored,
        visa_types: record.visa_types.clone(),
        latest_update,
        source: record.source.clone(),
    }
}

/// Attaches sponsor summaries to a batch of postings, spending at most
/// `remote_budget` remote lookups per batch.
pub struct JobEnricher<'r, 'a> {
    db: &'a Database,
    resolver: &'r SponsorResolver<'a>,
    remote_budget: usize,
}

impl<'r, 'a> JobEnricher<'r, 'a> {
    pub fn new(db: &'a Database, resolver: &'r SponsorResolver<'a>, remote_budget: usize) -> Self {
        Self {
            db,
            resolver,
            remote_budget,
        }
    }

    pub fn enrich(&self, mut postings: Vec<ScoredPosting>) -> Result<Vec<EnrichedPosting>> {
        let summaries = self.sponsor_summaries(&mut postings)?;
        Ok(postings
            .into_iter()
            .zip(summaries)
            .map(|(scored, sponsor)| EnrichedPosting {
                posting: scored.posting,
                similarity: scored.similarity,
                sponsor,
            })
            .collect())
    }

    /// Sponsor summaries aligned with `postings`. A posting whose company
    /// resolves to a stored record is linked to it, both in the database and
    /// in place.
    pub fn sponsor_summaries(&self, postings: &mut [ScoredPosting]) -> Result<Vec<Option<SponsorSummary>>> {
        // Distinct companies in first-seen order, with the raw name used for remote queries
        let keys: Vec<String> = postings.iter().map(|p| normalize(&p.posting.company)).collect();
        let mut groups: Vec<(String, String)> = Vec::new();
        for (key, scored) in keys.iter().zip(postings.iter()) {
            if !key.is_empty() && !groups.iter().any(|(k, _)| k == key) {
                groups.push((key.clone(), scored.posting.company.trim().to_string()));
            }
        }

        let names: Vec<String> = groups.iter().map(|(k, _)| k.clone()).collect();
        let mut local: HashMap<String, SponsorRecord> = self
            .db
            .find_sponsors_by_normalized_names(&names)?
            .into_iter()
            .map(|r| (r.normalized_name.clone(), r))
            .collect();

        let misses: Vec<&String> = names.iter().filter(|n| !local.contains_key(*n)).collect();
        if !misses.is_empty() {
            let all = self.db.list_sponsors()?;
            for name in misses {
                if let Some(record) = match_secondary(&all, name) {
                    local.insert(name.clone(), record.clone());
                }
            }
        }

        let mut budget = self.remote_budget;
        let mut resolved_by_key: HashMap<String, (i64, SponsorSummary)> = HashMap::new();
        for (key, raw_name) in &groups {
            let existing = local.remove(key);
            let wants_remote = existing.as_ref().is_none_or(|r| self.resolver.is_stale(r));

            let resolved = if wants_remote && self.resolver.is_configured() {
                if budget > 0 {
                    budget -= 1;
                    match self.resolver.refresh(raw_name, existing.clone()) {
                        Ok(record) => record,
                        Err(err) => {
                            warn!(company = %raw_name, error = %err, "Sponsor enrichment lookup failed");
                            existing
                        }
                    }
                } else {
                    debug!(company = %raw_name, "Remote sponsor budget exhausted");
                    existing
                }
            } else {
                existing
            };

            if let Some(record) = resolved {
                resolved_by_key.insert(key.clone(), (record.id, summarize(&record)));
            }
        }

        debug!(
            companies = groups.len(),
            remote_calls = self.remote_budget - budget,
            "Enriched posting batch"
        );

        let mut summaries = Vec::with_capacity(postings.len());
        for (scored, key) in postings.iter_mut().zip(&keys) {
            let Some((sponsor_id, summary)) = resolved_by_key.get(key) else {
                summaries.push(None);
                continue;
            };
            self.link(&mut scored.posting, *sponsor_id);
            summaries.push(Some(summary.clone()));
        }
        Ok(summaries)
    }

    fn link(&self, posting: &mut JobPosting, sponsor_id: i64) {
        if sponsor_id <= 0 || posting.sponsor_id == Some(sponsor_id) {
            return;
        }
        match self.db.link_job_sponsor(posting.id, sponsor_id) {
            Ok(()) => posting.sponsor_id = Some(sponsor_id),
            Err(err) => {
                warn!(job_id = posting.id, sponsor_id, error = %err, "Failed to link posting to sponsor");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{new_job, posting, sponsor};
    use crate::error::ResolveError;
    use crate::provider::tests::FakeProvider;
    use crate::provider::CandidateSponsor;
    use crate::sponsor::SYNCED_AT_KEY;
    use chrono::Utc;
    use serde_json::json;

    fn batch(companies: &[&str]) -> Vec<ScoredPosting> {
        companies
            .iter()
            .enumerate()
            .map(|(i, company)| ScoredPosting {
                posting: posting(i as i64 + 1, company),
                similarity: None,
            })
            .collect()
    }

    #[test]
    fn test_budget_caps_remote_calls() {
        let db = Database::open_in_memory().unwrap();
        let provider = FakeProvider::echo();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let companies = ["A1 Labs", "B2 Labs", "C3 Labs", "D4 Labs", "E5 Labs", "F6 Labs", "G7 Labs", "H8 Labs"];
        let enriched = enricher.enrich(batch(&companies)).unwrap();

        assert_eq!(provider.calls.get(), 5);
        assert_eq!(enriched.len(), 8);
        assert_eq!(enriched.iter().filter(|e| e.sponsor.is_some()).count(), 5);
        assert!(enriched[7].sponsor.is_none());
    }

    #[test]
    fn test_failed_attempts_still_spend_budget() {
        let db = Database::open_in_memory().unwrap();
        let provider = FakeProvider::down();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 2);

        let enriched = enricher.enrich(batch(&["Alpha", "Beta", "Gamma"])).unwrap();
        assert_eq!(provider.calls.get(), 2);
        assert!(enriched.iter().all(|e| e.sponsor.is_none()));
    }

    #[test]
    fn test_same_company_shares_one_lookup() {
        let db = Database::open_in_memory().unwrap();
        let provider = FakeProvider::echo();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["Acme, Inc.", "ACME INC", "acme inc"])).unwrap();
        assert_eq!(provider.calls.get(), 1);
        assert!(enriched.iter().all(|e| e.sponsor.is_some()));
        assert_eq!(enriched[1].posting.company, "ACME INC");
    }

    #[test]
    fn test_empty_company_gets_no_summary() {
        let db = Database::open_in_memory().unwrap();
        let provider = FakeProvider::echo();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["", "  ", "Acme"])).unwrap();
        assert_eq!(provider.calls.get(), 1);
        assert!(enriched[0].sponsor.is_none());
        assert!(enriched[1].sponsor.is_none());
        assert!(enriched[2].sponsor.is_some());
    }

    #[test]
    fn test_fresh_local_records_skip_remote() {
        let db = Database::open_in_memory().unwrap();
        let mut record = sponsor("Acme");
        record.notes = Some("curated note".to_string());
        record.metadata = json!({ SYNCED_AT_KEY: Utc::now().to_rfc3339() });
        db.upsert_sponsor(&record).unwrap();

        let provider = FakeProvider::echo();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["Acme"])).unwrap();
        assert_eq!(provider.calls.get(), 0);
        let summary = enriched[0].sponsor.as_ref().unwrap();
        assert_eq!(summary.confidence, 70);
        assert_eq!(summary.latest_update.as_deref(), Some("curated note"));
        assert_eq!(summary.source, "manual");
    }

    #[test]
    fn test_partial_failure_keeps_rest_of_batch() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_sponsor(&sponsor("Broken Co")).unwrap();

        let provider = FakeProvider::new(|query| {
            if query == "Broken Co" {
                Err(ResolveError::Malformed("bad payload".to_string()))
            } else {
                Ok(vec![CandidateSponsor::named(query)])
            }
        });
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["Broken Co", "Working Co"])).unwrap();
        assert_eq!(provider.calls.get(), 2);
        // stale local data carried forward for the failed company
        assert_eq!(enriched[0].sponsor.as_ref().unwrap().source, "manual");
        assert_eq!(enriched[1].sponsor.as_ref().unwrap().company_name, "Working Co");
    }

    #[test]
    fn test_unconfigured_uses_local_only() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_sponsor(&sponsor("Acme")).unwrap();
        let resolver = SponsorResolver::new(&db, None, 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["Acme", "Globex"])).unwrap();
        assert!(enriched[0].sponsor.is_some());
        assert!(enriched[1].sponsor.is_none());
    }

    #[test]
    fn test_alias_match_in_batch() {
        let db = Database::open_in_memory().unwrap();
        let mut record = sponsor("Alphabet");
        record.aliases = vec!["Google LLC".to_string()];
        record.metadata = json!({ SYNCED_AT_KEY: Utc::now().to_rfc3339() });
        db.upsert_sponsor(&record).unwrap();

        let provider = FakeProvider::echo();
        let resolver = SponsorResolver::new(&db, Some(Box::new(&provider)), 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let enriched = enricher.enrich(batch(&["Google, LLC"])).unwrap();
        assert_eq!(provider.calls.get(), 0);
        assert_eq!(enriched[0].sponsor.as_ref().unwrap().company_name, "Alphabet");
    }

    #[test]
    fn test_postings_are_linked_to_resolved_sponsor() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let acme_id = db.upsert_job(&new_job("https://jobs.example.com/acme", "Acme"), now).unwrap();
        let globex_id = db.upsert_job(&new_job("https://jobs.example.com/globex", "Globex"), now).unwrap();
        let stored = db.upsert_sponsor(&sponsor("Acme")).unwrap();

        let resolver = SponsorResolver::new(&db, None, 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);
        let postings = vec![
            ScoredPosting {
                posting: db.get_job(acme_id).unwrap().unwrap(),
                similarity: None,
            },
            ScoredPosting {
                posting: db.get_job(globex_id).unwrap().unwrap(),
                similarity: None,
            },
        ];

        let enriched = enricher.enrich(postings).unwrap();
        assert_eq!(enriched[0].posting.sponsor_id, Some(stored.id));
        assert_eq!(enriched[1].posting.sponsor_id, None);
        assert_eq!(db.get_job(acme_id).unwrap().unwrap().sponsor_id, Some(stored.id));
        assert_eq!(db.get_job(globex_id).unwrap().unwrap().sponsor_id, None);
    }

    #[test]
    fn test_summaries_leave_postings_in_place() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_sponsor(&sponsor("Acme")).unwrap();
        let resolver = SponsorResolver::new(&db, None, 6);
        let enricher = JobEnricher::new(&db, &resolver, 5);

        let mut postings = batch(&["Acme", "Globex", "ACME"]);
        let summaries = enricher.sponsor_summaries(&mut postings).unwrap();

        assert_eq!(postings.len(), 3);
        assert_eq!(summaries.len(), 3);
        assert!(summaries[0].is_some());
        assert!(summaries[1].is_none());
        assert_eq!(summaries[2], summaries[0]);
    }

    #[test]
    fn test_summary_prefers_remote_update() {
        let mut record = sponsor("Acme");
        record.notes = Some("old note".to_string());
        record.metadata = json!({ UPDATE_KEY: {"summary": "fresh news", "timestamp": null} });
        assert_eq!(summarize(&record).latest_update.as_deref(), Some("fresh news"));
    }
}
