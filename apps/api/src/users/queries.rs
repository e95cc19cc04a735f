use sqlx::PgConnection;

use crate::db::DbError;
use crate::models::user::{SimilarUserRow, UserRow};
use crate::users::embedding::Embedding;

/// Column changes for a partial update. `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct UserChanges<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub embedding: Option<&'a Embedding>,
}

pub async fn find_by_id(conn: &mut PgConnection, id: i32) -> Result<Option<UserRow>, DbError> {
    Ok(
        sqlx::query_as::<_, UserRow>("SELECT id, name, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?,
    )
}

pub async fn find_by_email(
    conn: &mut PgConnection,
    email: &str,
) -> Result<Option<UserRow>, DbError> {
    Ok(
        sqlx::query_as::<_, UserRow>("SELECT id, name, email FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(conn)
            .await?,
    )
}

/// Inserts a user and returns the stored row with its assigned id.
pub async fn insert(
    conn: &mut PgConnection,
    name: &str,
    email: &str,
    embedding: Option<&Embedding>,
) -> Result<UserRow, DbError> {
    let row = match embedding {
        Some(embedding) => {
            sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (name, email, embedding) VALUES ($1, $2, $3::vector) RETURNING id, name, email",
            )
            .bind(name)
            .bind(email)
            .bind(embedding.to_pg_literal())
            .fetch_one(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (name, email) VALUES ($1, $2) RETURNING id, name, email",
            )
            .bind(name)
            .bind(email)
            .fetch_one(conn)
            .await?
        }
    };
    Ok(row)
}

/// Applies `changes` in one statement. Returns `None` when no row has `id`.
pub async fn update(
    conn: &mut PgConnection,
    id: i32,
    changes: &UserChanges<'_>,
) -> Result<Option<UserRow>, DbError> {
    let row = match changes.embedding {
        Some(embedding) => {
            sqlx::query_as::<_, UserRow>(
                r#"
                UPDATE users
                SET name = COALESCE($2, name),
                    email = COALESCE($3, email),
                    embedding = $4::vector
                WHERE id = $1
                RETURNING id, name, email
                "#,
            )
            .bind(id)
            .bind(changes.name)
            .bind(changes.email)
            .bind(embedding.to_pg_literal())
            .fetch_optional(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, UserRow>(
                r#"
                UPDATE users
                SET name = COALESCE($2, name),
                    email = COALESCE($3, email)
                WHERE id = $1
                RETURNING id, name, email
                "#,
            )
            .bind(id)
            .bind(changes.name)
            .bind(changes.email)
            .fetch_optional(conn)
            .await?
        }
    };
    Ok(row)
}

/// Deletes a user. Returns `false` when no row has `id`.
pub async fn delete(conn: &mut PgConnection, id: i32) -> Result<bool, DbError> {
    let deleted: Option<i32> = sqlx::query_scalar("DELETE FROM users WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(deleted.is_some())
}

/// Users with an embedding, nearest first by cosine distance.
pub async fn find_similar(
    conn: &mut PgConnection,
    embedding: &Embedding,
    limit: i64,
) -> Result<Vec<SimilarUserRow>, DbError> {
    Ok(sqlx::query_as::<_, SimilarUserRow>(
        r#"
        SELECT id, name, email,
               (1 - (embedding <=> $1::vector))::float8 AS similarity
        FROM users
        WHERE embedding IS NOT NULL
        ORDER BY embedding <=> $1::vector
        LIMIT $2
        "#,
    )
    .bind(embedding.to_pg_literal())
    .bind(limit)
    .fetch_all(conn)
    .await?)
}
