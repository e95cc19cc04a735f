use serde::Deserialize;
use validator::Validate;

use crate::errors::AppError;
use crate::users::embedding::Embedding;

/// Body of `POST /users/`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserCreate {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    /// Only accepted when embeddings are enabled.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Body of `PUT /users/{id}`. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.embedding.is_none()
    }
}

/// Body of `POST /users/search`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SimilarityQuery {
    pub embedding: Vec<f32>,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

/// Checks an optional embedding against the active schema variant.
pub fn checked_embedding(
    raw: Option<Vec<f32>>,
    embeddings_enabled: bool,
) -> Result<Option<Embedding>, AppError> {
    match raw {
        None => Ok(None),
        Some(_) if !embeddings_enabled => Err(AppError::Validation(
            "embeddings are not enabled on this server".to_string(),
        )),
        Some(values) => Embedding::try_from(values)
            .map(Some)
            .map_err(AppError::Validation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::embedding::EMBEDDING_DIM;
    use serde_json::json;

    #[test]
    fn test_create_requires_name_and_email() {
        assert!(serde_json::from_value::<UserCreate>(json!({"name": "A"})).is_err());
        assert!(serde_json::from_value::<UserCreate>(json!({"email": "a@x.com"})).is_err());
    }

    #[test]
    fn test_create_valid() {
        let body: UserCreate =
            serde_json::from_value(json!({"name": "A", "email": "a@x.com"})).unwrap();
        assert!(body.validate().is_ok());
        assert!(body.embedding.is_none());
    }

    #[test]
    fn test_create_rejects_bad_email_and_empty_name() {
        let body: UserCreate =
            serde_json::from_value(json!({"name": "", "email": "not-an-email"})).unwrap();
        let errors = body.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn test_lengths_capped_at_column_width() {
        let body: UserCreate = serde_json::from_value(
            json!({"name": "n".repeat(255), "email": format!("{}@x.com", "e".repeat(60))}),
        )
        .unwrap();
        assert!(body.validate().is_ok());

        let body: UserUpdate =
            serde_json::from_value(json!({"name": "n".repeat(256)})).unwrap();
        assert!(body.validate().unwrap_err().field_errors().contains_key("name"));
    }

    #[test]
    fn test_update_all_optional() {
        let body: UserUpdate = serde_json::from_value(json!({})).unwrap();
        assert!(body.is_empty());
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_update_name_only() {
        let body: UserUpdate = serde_json::from_value(json!({"name": "B"})).unwrap();
        assert_eq!(body.name.as_deref(), Some("B"));
        assert!(body.email.is_none());
        assert!(!body.is_empty());
    }

    #[test]
    fn test_update_validates_supplied_email() {
        let body: UserUpdate = serde_json::from_value(json!({"email": "nope"})).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_similarity_limit_default_and_range() {
        let body: SimilarityQuery = serde_json::from_value(json!({"embedding": []})).unwrap();
        assert_eq!(body.limit, 10);
        let body: SimilarityQuery =
            serde_json::from_value(json!({"embedding": [], "limit": 0})).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_embedding_rejected_when_disabled() {
        let err = checked_embedding(Some(vec![0.0; EMBEDDING_DIM]), false).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_embedding_checked_when_enabled() {
        assert!(checked_embedding(None, true).unwrap().is_none());
        assert!(checked_embedding(Some(vec![0.0; EMBEDDING_DIM]), true)
            .unwrap()
            .is_some());
        assert!(checked_embedding(Some(vec![0.0; 2]), true).is_err());
    }
}
