use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Canonical lookup key for a company name: lowercase alphanumeric tokens
/// separated by single spaces. "Acme, Inc." and "ACME INC" both become "acme inc".
pub fn normalize(name: &str) -> String {
    let lower = name.to_lowercase();
    NON_ALNUM.replace_all(&lower, " ").trim().to_string()
}

/// Similarity between two already-normalized names, 0.0..=1.0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(a, b)
}
