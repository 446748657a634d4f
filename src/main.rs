use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use jobscout::config::Config;
use jobscout::db::Database;
use jobscout::embed::embedder_from_config;
use jobscout::enrich::summarize;
use jobscout::models::{JobCategory, JobFilters, NewJobPosting, SearchResult, VisaStatus};
use jobscout::profile::update_profile;
use jobscout::search::{JobSearch, SearchRequest};
use jobscout::sponsor::{synced_at, SponsorResolver};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "New-grad and internship job matching with visa sponsorship data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Import crawled postings from a JSON-lines file
    Import {
        /// One posting per line
        file: PathBuf,
    },

    /// Mark postings not seen recently as inactive
    Sweep {
        /// Days without a sighting before a posting goes inactive
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Manage user profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Search and rank postings
    Search {
        /// Free-text query to rank against
        #[arg(short, long)]
        text: Option<String>,

        /// Rank against this user's stored profile
        #[arg(short, long)]
        user: Option<String>,

        /// Category (new_grad, internship)
        #[arg(short, long)]
        category: Option<String>,

        /// Remote postings only
        #[arg(long)]
        remote: bool,

        /// Location substring
        #[arg(short, long)]
        location: Option<String>,

        /// Visa status (sponsor_verified, likely_sponsor, unknown, no_sponsorship)
        #[arg(long)]
        visa: Option<String>,

        /// Minimum sponsorship confidence (0-100)
        #[arg(long)]
        min_confidence: Option<i64>,

        /// Verified sponsors only
        #[arg(long)]
        verified: bool,

        /// Only postings from the last N days
        #[arg(long)]
        within_days: Option<i64>,

        /// Include inactive postings
        #[arg(long)]
        all: bool,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one posting with sponsor data
    Show {
        /// Job ID
        id: i64,
    },

    /// Sponsor lookups
    Sponsor {
        #[command(subcommand)]
        command: SponsorCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Set a user's interests
    Set {
        /// User ID
        user: String,

        /// Free-text description of the roles wanted
        text: String,
    },

    /// Show a stored profile
    Show {
        /// User ID
        user: String,
    },
}

#[derive(Subcommand)]
enum SponsorCommands {
    /// Resolve a company to its best-known sponsor record
    Resolve {
        /// Company name as it appears on postings
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Import { file } => {
            db.ensure_initialized()?;
            let embedder = embedder_from_config(&config.embedding)?;
            let reader = std::io::BufReader::new(
                std::fs::File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?,
            );

            let now = Utc::now();
            let mut imported = 0;
            let mut skipped = 0;
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let mut job: NewJobPosting = match serde_json::from_str(&line) {
                    Ok(job) => job,
                    Err(err) => {
                        warn!(line = line_no + 1, error = %err, "Skipping malformed posting");
                        skipped += 1;
                        continue;
                    }
                };

                if job.embedding.is_none() {
                    if let Some(embedder) = &embedder {
                        let text = format!("{}\n{}", job.title, job.description);
                        match embedder.embed(&text) {
                            Ok(vector) => job.embedding = Some(vector),
                            Err(err) => warn!(url = %job.url, error = %err, "Posting embedding failed"),
                        }
                    }
                }

                db.upsert_job(&job, now)?;
                imported += 1;
            }

            println!("Imported {} posting(s)", imported);
            if skipped > 0 {
                println!("Skipped {} malformed line(s)", skipped);
            }
        }

        Commands::Sweep { days } => {
            db.ensure_initialized()?;
            let days = days.unwrap_or(config.job_stale_days);
            let changed = db.mark_inactive_before(days_ago(days)?)?;
            println!("Marked {} posting(s) inactive (not seen in {} days)", changed, days);
        }

        Commands::Profile { command } => {
            db.ensure_initialized()?;
            match command {
                ProfileCommands::Set { user, text } => {
                    let embedder = embedder_from_config(&config.embedding)?;
                    let profile = update_profile(&db, embedder.as_deref(), &user, &text)?;
                    if profile.embedding.is_some() {
                        println!("Profile for '{}' saved.", user);
                    } else {
                        println!("Profile for '{}' saved without an embedding; searches will be chronological.", user);
                    }
                }

                ProfileCommands::Show { user } => match db.get_profile(&user)? {
                    Some(profile) => {
                        println!("User: {}", profile.user_id);
                        println!("Updated: {}", profile.updated_at);
                        println!("Embedded: {}", if profile.embedding.is_some() { "yes" } else { "no" });
                        println!();
                        for line in textwrap::fill(&profile.description, 70).lines() {
                            println!("  {}", line);
                        }
                    }
                    None => {
                        println!("No profile for '{}'.", user);
                    }
                },
            }
        }

        Commands::Search {
            text,
            user,
            category,
            remote,
            location,
            visa,
            min_confidence,
            verified,
            within_days,
            all,
            limit,
            offset,
        } => {
            db.ensure_initialized()?;

            let filters = JobFilters {
                active_only: Some(!all),
                category: category
                    .as_deref()
                    .map(|c| JobCategory::parse(c).ok_or_else(|| anyhow!("Unknown category '{}'", c)))
                    .transpose()?,
                remote: remote.then_some(true),
                location,
                visa_status: visa
                    .as_deref()
                    .map(|v| VisaStatus::parse(v).ok_or_else(|| anyhow!("Unknown visa status '{}'", v)))
                    .transpose()?,
                min_sponsorship_confidence: min_confidence,
                verified_sponsor_only: verified,
                posted_after: within_days.map(days_ago).transpose()?,
                posted_before: None,
                limit: Some(limit),
                offset: Some(offset),
            };

            let search = JobSearch::from_config(&db, &config)?;
            let page = search.search(&SearchRequest {
                filters,
                query_text: text,
                user_id: user,
            })?;

            if page.results.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<5} {:<6} {:>6} {:<30} {:<20} {:<16}",
                    "RANK", "ID", "SCORE", "TITLE", "COMPANY", "VISA"
                );
                println!("{}", "-".repeat(88));
                for (i, result) in page.results.iter().enumerate() {
                    print_result_row(offset + i + 1, result);
                }
                println!("\nShowing {} of {} matching posting(s)", page.results.len(), page.total);
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            let search = JobSearch::from_config(&db, &config)?;
            match search.get_enriched_job(id)? {
                Some(result) => print_result_detail(&result),
                None => {
                    println!("Job #{} not found.", id);
                }
            }
        }

        Commands::Sponsor { command } => {
            db.ensure_initialized()?;
            match command {
                SponsorCommands::Resolve { name } => {
                    let resolver = SponsorResolver::from_config(&db, &config)?;
                    match resolver.resolve(&name)? {
                        Some(record) => {
                            let summary = summarize(&record);
                            println!("Sponsor #{}", record.id);
                            println!("Company: {}", summary.company_name);
                            if !record.aliases.is_empty() {
                                println!("Aliases: {}", record.aliases.join(", "));
                            }
                            println!("Confidence: {}", summary.confidence);
                            if let Some(year) = summary.last_year_sponsored {
                                println!("Last sponsored: {}", year);
                            }
                            if !summary.visa_types.is_empty() {
                                println!("Visa types: {}", summary.visa_types.join(", "));
                            }
                            println!("Source: {}", summary.source);
                            match synced_at(&record) {
                                Some(at) => println!("Synced: {}", at),
                                None => println!("Synced: never"),
                            }
                            if resolver.is_stale(&record) {
                                println!("(stale)");
                            }
                            if let Some(update) = &summary.latest_update {
                                println!("\n{}", textwrap::fill(update, 70));
                            }
                        }
                        None => {
                            println!("No sponsor data for '{}'.", name);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_result_row(rank: usize, result: &SearchResult) {
    println!(
        "{:<5} {:<6} {:>6.3} {:<30} {:<20} {:<16}",
        rank,
        result.posting.id,
        result.match_score,
        truncate(&result.posting.title, 28),
        truncate(&result.posting.company, 18),
        result.posting.visa_status.as_str()
    );
    let reasons = result.match_reasons.join("; ");
    for line in textwrap::fill(&reasons, 70).lines() {
        println!("{:<19}{}", "", line);
    }
}

fn print_result_detail(result: &SearchResult) {
    let job = &result.posting;
    println!("Job #{}", job.id);
    println!("Title: {}", job.title);
    println!("Company: {}", job.company);
    if let Some(location) = &job.location {
        println!("Location: {}{}", location, if job.remote { " (remote)" } else { "" });
    } else if job.remote {
        println!("Location: remote");
    }
    println!("Category: {}", job.category.as_str());
    println!("URL: {}", job.url);
    println!("Source: {}", job.source);
    if let Some(posted_at) = job.posted_at {
        println!("Posted: {}", posted_at);
    }
    println!("Last seen: {}", job.last_seen_at);
    println!("Active: {}", if job.active { "yes" } else { "no" });
    println!("Visa status: {} (confidence {})", job.visa_status.as_str(), job.sponsorship_confidence);

    if let Some(sponsor) = &result.sponsor_summary {
        println!("\n--- Sponsor ---");
        println!("{} (confidence {}, source {})", sponsor.company_name, sponsor.confidence, sponsor.source);
        if let Some(year) = sponsor.last_year_sponsored {
            println!("Last sponsored: {}", year);
        }
        if !sponsor.visa_types.is_empty() {
            println!("Visa types: {}", sponsor.visa_types.join(", "));
        }
        if let Some(update) = &sponsor.latest_update {
            println!("{}", textwrap::fill(update, 70));
        }
    }

    println!(
        "\nScore: {:.3} (recency {:.1}, sponsorship {:.1})",
        result.match_score, result.score.recency, result.score.sponsorship
    );
    for reason in &result.match_reasons {
        println!("  - {}", reason);
    }

    if !job.description.is_empty() {
        println!("\n--- Description ---\n{}", textwrap::fill(&job.description, 80));
    }
}

fn days_ago(days: i64) -> Result<DateTime<Utc>> {
    if days < 0 {
        return Err(anyhow!("Day count must not be negative: {}", days));
    }
    Duration::try_days(days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| anyhow!("Day count out of range: {}", days))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_ago_rejects_out_of_range() {
        assert!(days_ago(7).unwrap() < Utc::now());
        assert!(days_ago(-1).is_err());
        assert!(days_ago(i64::MAX).is_err());
        assert!(days_ago(10_000_000_000_000).is_err());
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Société Générale", 8), "Socié...");
    }
}
