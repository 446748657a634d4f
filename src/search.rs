use anyhow::{Context, Result};
use chrono::Utc;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::embed::{embedder_from_config, Embedder};
use crate::enrich::JobEnricher;
use crate::error::EmbeddingError;
use crate::models::{EnrichedPosting, JobFilters, ScoredPosting, SearchResult};
use crate::score::ScoringPolicy;
use crate::sponsor::SponsorResolver;

// --- Similarity search ---

/// Cosine similarity clamped to `[0, 1]`. Zero-length or zero-norm vectors
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_nan() { 0.0 } else { sim.clamp(0.0, 1.0) }
}

/// Filtered postings for one page. With a query vector they are ranked by
/// similarity (postings without a usable vector trail, unranked); without one
/// they come back most recently seen first.
pub fn similarity_search(
    db: &Database,
    filters: &JobFilters,
    query_vector: Option<&[f32]>,
) -> Result<Vec<ScoredPosting>> {
    let limit = filters.effective_limit();
    let offset = filters.effective_offset();

    let Some(query) = query_vector.filter(|q| !q.is_empty()) else {
        let jobs = db.query_jobs(filters, Some(limit), offset)?;
        return Ok(jobs
            .into_iter()
            .map(|posting| ScoredPosting {
                posting,
                similarity: None,
            })
            .collect());
    };

    let candidates = db.query_jobs(filters, None, 0)?;
    let mut ranked: Vec<ScoredPosting> = Vec::with_capacity(candidates.len());
    let mut unranked: Vec<ScoredPosting> = Vec::new();

    for posting in candidates {
        match posting.embedding.as_deref() {
            Some(vector) if vector.len() == query.len() => {
                let similarity = cosine_similarity(vector, query);
                ranked.push(ScoredPosting {
                    posting,
                    similarity: Some(similarity),
                });
            }
            Some(vector) => {
                warn!(
                    job_id = posting.id,
                    stored = vector.len(),
                    expected = query.len(),
                    "Skipping job embedding with wrong dimension"
                );
                unranked.push(ScoredPosting {
                    posting,
                    similarity: None,
                });
            }
            None => unranked.push(ScoredPosting {
                posting,
                similarity: None,
            }),
        }
    }

    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    ranked.extend(unranked);

    Ok(ranked.into_iter().skip(offset).take(limit).collect())
}

pub fn count(db: &Database, filters: &JobFilters) -> Result<usize> {
    db.count_jobs(filters)
}

// --- Search service ---

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub filters: JobFilters,
    /// Free text to rank against. Takes precedence over the profile.
    pub query_text: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub total: usize,
}

pub struct JobSearch<'a> {
    db: &'a Database,
    resolver: SponsorResolver<'a>,
    embedder: Option<Box<dyn Embedder + 'a>>,
    policy: ScoringPolicy,
    remote_budget: usize,
}

impl<'a> JobSearch<'a> {
    pub fn new(
        db: &'a Database,
        resolver: SponsorResolver<'a>,
        embedder: Option<Box<dyn Embedder + 'a>>,
        remote_budget: usize,
    ) -> Self {
        Self {
            db,
            resolver,
            embedder,
            policy: ScoringPolicy::default(),
            remote_budget,
        }
    }

    pub fn from_config(db: &'a Database, config: &Config) -> Result<Self> {
        let resolver = SponsorResolver::from_config(db, config)?;
        let embedder = embedder_from_config(&config.embedding)?;
        match &embedder {
            Some(embedder) => debug!(
                model = embedder.model_name(),
                dimension = embedder.dimension(),
                "Embedding provider ready"
            ),
            None => info!("No embedding provider configured; searches are chronological"),
        }
        Ok(Self::new(db, resolver, embedder, config.remote_budget))
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let query_vector = self.query_vector(request)?;
        let postings = similarity_search(self.db, &request.filters, query_vector.as_deref())?;
        let total = count(self.db, &request.filters)?;

        debug!(
            returned = postings.len(),
            total,
            ranked = query_vector.is_some(),
            "Similarity search complete"
        );

        let enriched = self.enrich(postings);
        Ok(SearchPage {
            results: self.policy.score(enriched, Utc::now()),
            total,
        })
    }

    /// One posting with sponsor data and scores. Similarity is absent since
    /// there is no query.
    pub fn get_enriched_job(&self, id: i64) -> Result<Option<SearchResult>> {
        let Some(posting) = self.db.get_job(id)? else {
            return Ok(None);
        };

        let enriched = self.enrich(vec![ScoredPosting {
            posting,
            similarity: None,
        }]);
        Ok(self.policy.score(enriched, Utc::now()).into_iter().next())
    }

    fn enrich(&self, mut postings: Vec<ScoredPosting>) -> Vec<EnrichedPosting> {
        let enricher = JobEnricher::new(self.db, &self.resolver, self.remote_budget);
        let summaries = match enricher.sponsor_summaries(&mut postings) {
            Ok(summaries) => summaries,
            Err(err) => {
                warn!(error = %err, "Sponsor enrichment failed; returning postings without sponsor data");
                vec![None; postings.len()]
            }
        };

        postings
            .into_iter()
            .zip(summaries)
            .map(|(scored, sponsor)| EnrichedPosting {
                posting: scored.posting,
                similarity: scored.similarity,
                sponsor,
            })
            .collect()
    }

    fn query_vector(&self, request: &SearchRequest) -> Result<Option<Vec<f32>>> {
        if let Some(text) = request.query_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let embedder = self.embedder.as_ref().ok_or(EmbeddingError::NotConfigured)?;
            let vector = embedder
                .embed(text)
                .context("Failed to embed search text")?;
            return Ok(Some(vector));
        }

        let Some(user_id) = request.user_id.as_deref() else {
            return Ok(None);
        };
        let Some(profile) = self.db.get_profile(user_id)? else {
            debug!(user_id, "No profile stored; using chronological order");
            return Ok(None);
        };
        if let Some(vector) = profile.embedding {
            return Ok(Some(vector));
        }

        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(None);
        };
        if profile.description.trim().is_empty() {
            return Ok(None);
        }
        match embedder.embed(&profile.description) {
            Ok(vector) => Ok(Some(vector)),
            Err(err) => {
                warn!(user_id, error = %err, "Profile embedding failed; using chronological order");
                Ok(None)
            }
        }
    }
}
