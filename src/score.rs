//! Composite ranking: similarity, recency and sponsorship confidence blended
//! into one `match_score` per posting. Pure; no I/O.

use chrono::{DateTime, Utc};

use crate::models::{EnrichedPosting, ScoreBreakdown, SearchResult, VisaStatus};

pub const REASON_STRONG_ALIGNMENT: &str = "Strong alignment with your profile";
pub const REASON_GOOD_MATCH: &str = "Good match for your interests";
pub const REASON_RECENT: &str = "Recently posted";
pub const REASON_SPONSOR_CONFIDENT: &str = "High confidence visa sponsorship";
pub const REASON_LIKELY_SPONSOR: &str = "Likely to sponsor work visas";
pub const REASON_FALLBACK: &str = "Matches your filters";

/// Weights and step-function breakpoints. The defaults are the production
/// policy; they are tunable here, not per call.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub similarity_weight: f64,
    pub recency_weight: f64,
    pub sponsorship_weight: f64,
    /// (max days since posted, score), checked in order.
    pub recency_steps: Vec<(i64, f64)>,
    pub verified_sponsor: f64,
    pub likely_sponsor: f64,
    /// (min confidence, score) tiers checked before `likely_sponsor`.
    pub confidence_high: Vec<(i64, f64)>,
    /// Tier checked after `likely_sponsor`.
    pub confidence_low: (i64, f64),
    pub strong_similarity: f64,
    pub good_similarity: f64,
    pub recent_reason: f64,
    pub sponsorship_reason: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            similarity_weight: 0.6,
            recency_weight: 0.25,
            sponsorship_weight: 0.15,
            recency_steps: vec![(3, 1.0), (7, 0.8), (14, 0.6), (30, 0.4), (60, 0.2)],
            verified_sponsor: 1.0,
            likely_sponsor: 0.5,
            confidence_high: vec![(80, 0.9), (60, 0.6)],
            confidence_low: (40, 0.3),
            strong_similarity: 0.75,
            good_similarity: 0.5,
            recent_reason: 0.6,
            sponsorship_reason: 0.6,
        }
    }
}

impl ScoringPolicy {
    pub fn recency(&self, posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(posted_at) = posted_at else {
            return 0.0;
        };
        let days = (now - posted_at).num_days();
        self.recency_steps
            .iter()
            .find(|(max_days, _)| days <= *max_days)
            .map(|(_, score)| *score)
            .unwrap_or(0.0)
    }

    pub fn sponsorship(&self, visa_status: VisaStatus, confidence: i64) -> f64 {
        if visa_status == VisaStatus::SponsorVerified {
            return self.verified_sponsor;
        }
        if let Some((_, score)) = self
            .confidence_high
            .iter()
            .find(|(min, _)| confidence >= *min)
        {
            return *score;
        }
        if visa_status == VisaStatus::LikelySponsor {
            return self.likely_sponsor;
        }
        if confidence >= self.confidence_low.0 {
            return self.confidence_low.1;
        }
        0.0
    }

    pub fn breakdown(&self, posting: &EnrichedPosting, now: DateTime<Utc>) -> ScoreBreakdown {
        let confidence = posting
            .sponsor
            .as_ref()
            .map(|s| s.confidence)
            .unwrap_or(posting.posting.sponsorship_confidence);

        ScoreBreakdown {
            similarity: posting.similarity.map(clamp_unit).unwrap_or(0.0),
            recency: self.recency(posting.posting.posted_at, now),
            sponsorship: self.sponsorship(posting.posting.visa_status, confidence),
        }
    }

    pub fn composite(&self, score: &ScoreBreakdown) -> f64 {
        let raw = self.similarity_weight * score.similarity
            + self.recency_weight * score.recency
            + self.sponsorship_weight * score.sponsorship;
        (raw * 1000.0).round() / 1000.0
    }

    pub fn reasons(&self, score: &ScoreBreakdown, has_sponsor_data: bool) -> Vec<String> {
        let mut reasons = Vec::new();

        if score.similarity >= self.strong_similarity {
            reasons.push(REASON_STRONG_ALIGNMENT.to_string());
        } else if score.similarity >= self.good_similarity {
            reasons.push(REASON_GOOD_MATCH.to_string());
        }

        if score.recency >= self.recent_reason {
            reasons.push(REASON_RECENT.to_string());
        }

        if score.sponsorship >= self.sponsorship_reason {
            if has_sponsor_data {
                reasons.push(REASON_SPONSOR_CONFIDENT.to_string());
            } else {
                reasons.push(REASON_LIKELY_SPONSOR.to_string());
            }
        }

        if reasons.is_empty() {
            reasons.push(REASON_FALLBACK.to_string());
        }
        reasons
    }

    /// Scores and ranks. Equal scores keep their input order.
    pub fn score(&self, postings: Vec<EnrichedPosting>, now: DateTime<Utc>) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = postings
            .into_iter()
            .map(|p| {
                let score = self.breakdown(&p, now);
                SearchResult {
                    match_score: self.composite(&score),
                    match_reasons: self.reasons(&score, p.sponsor.is_some()),
                    score,
                    similarity: p.similarity,
                    sponsor_summary: p.sponsor,
                    posting: p.posting,
                }
            })
            .collect();

        // sort_by is stable
        results.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        results
    }
}

/// Scores with the default policy.
pub fn score(postings: Vec<EnrichedPosting>, now: DateTime<Utc>) -> Vec<SearchResult> {
    ScoringPolicy::default().score(postings, now)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
