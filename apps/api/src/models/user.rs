use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The public columns of a `users` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: i32,
    pub name: String,
    pub email: String,
}

/// A user ranked by cosine similarity to a query embedding.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SimilarUserRow {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub similarity: f64,
}
