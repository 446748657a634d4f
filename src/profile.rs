use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::db::Database;
use crate::embed::Embedder;
use crate::models::UserProfile;

/// Stores a user's free-text interests along with a fresh embedding. When
/// embedding is unavailable or fails the text is still saved, without a
/// vector, and profile searches for this user stay chronological.
pub fn update_profile(
    db: &Database,
    embedder: Option<&dyn Embedder>,
    user_id: &str,
    description: &str,
) -> Result<UserProfile> {
    let description = description.trim();

    let embedding = match embedder {
        Some(embedder) if !description.is_empty() => match embedder.embed(description) {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(user_id, error = %err, "Profile embedding failed; storing text only");
                None
            }
        },
        _ => None,
    };

    let updated_at = Utc::now();
    db.upsert_profile(user_id, description, embedding.as_deref(), updated_at)?;
    info!(user_id, embedded = embedding.is_some(), "Profile updated");

    Ok(UserProfile {
        user_id: user_id.to_string(),
        description: description.to_string(),
        embedding,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::error::EmbeddingError;

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Status {
                status: 500,
                body: "unavailable".to_string(),
            })
        }

        fn dimension(&self) -> usize {
            16
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    #[test]
    fn test_update_profile_stores_vector() {
        let db = Database::open_in_memory().unwrap();
        let embedder = HashEmbedder::new(16);

        let profile = update_profile(&db, Some(&embedder), "u1", "  rust backend roles ").unwrap();
        assert_eq!(profile.description, "rust backend roles");

        let stored = db.get_profile("u1").unwrap().unwrap();
        assert_eq!(stored.description, "rust backend roles");
        assert_eq!(stored.embedding.unwrap().len(), 16);
    }

    #[test]
    fn test_embedding_failure_keeps_text() {
        let db = Database::open_in_memory().unwrap();
        let embedder = HashEmbedder::new(16);
        update_profile(&db, Some(&embedder), "u1", "rust").unwrap();

        // a failed re-embed must not leave the old vector behind
        let profile = update_profile(&db, Some(&DownEmbedder), "u1", "go and kubernetes").unwrap();
        assert!(profile.embedding.is_none());

        let stored = db.get_profile("u1").unwrap().unwrap();
        assert_eq!(stored.description, "go and kubernetes");
        assert!(stored.embedding.is_none());
    }

    #[test]
    fn test_without_embedder() {
        let db = Database::open_in_memory().unwrap();
        update_profile(&db, None, "u2", "data science").unwrap();
        assert!(db.get_profile("u2").unwrap().unwrap().embedding.is_none());
    }
}
