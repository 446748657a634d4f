use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    NewGrad,
    Internship,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::NewGrad => "new_grad",
            JobCategory::Internship => "internship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new_grad" => Some(JobCategory::NewGrad),
            "internship" => Some(JobCategory::Internship),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisaStatus {
    SponsorVerified,
    LikelySponsor,
    #[default]
    Unknown,
    NoSponsorship,
}

impl VisaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisaStatus::SponsorVerified => "sponsor_verified",
            VisaStatus::LikelySponsor => "likely_sponsor",
            VisaStatus::Unknown => "unknown",
            VisaStatus::NoSponsorship => "no_sponsorship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sponsor_verified" => Some(VisaStatus::SponsorVerified),
            "likely_sponsor" => Some(VisaStatus::LikelySponsor),
            "unknown" => Some(VisaStatus::Unknown),
            "no_sponsorship" => Some(VisaStatus::NoSponsorship),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: String,
    pub url: String, // unique, upsert key
    pub remote: bool,
    pub category: JobCategory,
    pub source: String, // "greenhouse", "lever", "simplify", etc.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub active: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub link_alive: bool,
    pub visa_status: VisaStatus,
    pub sponsorship_confidence: i64, // 0-100
    pub sponsor_id: Option<i64>,
    pub needs_review: bool,
}

/// What a crawler hands over for the upsert-by-URL write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobPosting {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub remote: bool,
    pub category: JobCategory,
    pub source: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visa_status: VisaStatus,
    #[serde(default)]
    pub sponsorship_confidence: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorRecord {
    pub id: i64,
    pub company_name: String,
    pub normalized_name: String, // unique
    pub aliases: Vec<String>,
    pub visa_types: Vec<String>,
    pub last_year_sponsored: Option<i32>,
    pub confidence: i64, // 0-100
    pub notes: Option<String>,
    pub source: String,
    pub metadata: serde_json::Value,
}

pub const DEFAULT_SPONSOR_CONFIDENCE: i64 = 50;

/// Lightweight projection of a sponsor record attached to each posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorSummary {
    pub company_name: String,
    pub confidence: i64,
    pub last_year_sponsored: Option<i32>,
    pub visa_types: Vec<String>,
    pub latest_update: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub description: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub updated_at: DateTime<Utc>,
}

/// A posting as produced by similarity search, before enrichment.
#[derive(Debug, Clone)]
pub struct ScoredPosting {
    pub posting: JobPosting,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EnrichedPosting {
    pub posting: JobPosting,
    pub similarity: Option<f64>,
    pub sponsor: Option<SponsorSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub similarity: f64,
    pub recency: f64,
    pub sponsorship: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub sponsor_summary: Option<SponsorSummary>,
    pub similarity: Option<f64>,
    pub score: ScoreBreakdown,
    pub match_score: f64,
    pub match_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub active_only: Option<bool>, // None means true
    pub category: Option<JobCategory>,
    pub remote: Option<bool>,
    pub location: Option<String>,
    pub visa_status: Option<VisaStatus>,
    pub min_sponsorship_confidence: Option<i64>,
    pub verified_sponsor_only: bool,
    pub posted_after: Option<DateTime<Utc>>,
    pub posted_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

impl JobFilters {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visa_status_round_trips_storage_names() {
        for status in [
            VisaStatus::SponsorVerified,
            VisaStatus::LikelySponsor,
            VisaStatus::Unknown,
            VisaStatus::NoSponsorship,
        ] {
            assert_eq!(VisaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VisaStatus::parse("maybe"), None);
    }

    #[test]
    fn test_limit_is_capped() {
        let filters = JobFilters {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(filters.effective_limit(), MAX_PAGE_SIZE);
        assert_eq!(JobFilters::default().effective_limit(), DEFAULT_PAGE_SIZE);
    }
}
