use anyhow::{bail, Context, Result};
use sqlx::{Connection, PgConnection};
use tracing::{info, warn};

use super::connect_options;
use crate::config::DatabaseConfig;
use crate::users::embedding::EMBEDDING_DIM;

/// Prepares the database before the listener accepts traffic.
///
/// Creates the target database when missing, enables pgvector when
/// embeddings are on, and creates the `users` table and its indexes.
/// Any error here must stop startup.
pub async fn run(config: &DatabaseConfig, embeddings_enabled: bool) -> Result<()> {
    ensure_database(config).await?;

    let mut conn = PgConnection::connect_with(&connect_options(config, &config.name))
        .await
        .with_context(|| format!("failed to connect to database '{}'", config.name))?;

    if embeddings_enabled {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&mut conn)
            .await
            .context("failed to enable the pgvector extension")?;
        info!("pgvector extension available");
    }

    ensure_schema(&mut conn, embeddings_enabled).await?;

    conn.close().await.ok();
    info!("DB initialized");
    Ok(())
}

/// Creates `config.name` through the admin database if it does not exist yet.
async fn ensure_database(config: &DatabaseConfig) -> Result<()> {
    // CREATE DATABASE cannot run inside a transaction block; a bare connection runs in autocommit.
    let mut admin = PgConnection::connect_with(&connect_options(config, &config.admin_database))
        .await
        .with_context(|| {
            format!(
                "failed to connect to admin database '{}' on {}:{}",
                config.admin_database, config.host, config.port
            )
        })?;

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&config.name)
        .fetch_optional(&mut admin)
        .await
        .context("failed to query pg_database")?;

    if exists.is_some() {
        info!("Database '{}' already exists", config.name);
    } else {
        let statement = format!("CREATE DATABASE {}", quote_ident(&config.name)?);
        sqlx::query(&statement)
            .execute(&mut admin)
            .await
            .with_context(|| format!("failed to create database '{}'", config.name))?;
        info!("Database '{}' created", config.name);
    }

    admin.close().await.ok();
    Ok(())
}

async fn ensure_schema(conn: &mut PgConnection, embeddings_enabled: bool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL CHECK (char_length(name) > 0),
            email VARCHAR(255) NOT NULL UNIQUE
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("failed to create table 'users'")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_users_name ON users (name)")
        .execute(&mut *conn)
        .await
        .context("failed to create index 'ix_users_name'")?;

    if embeddings_enabled {
        let add_column = format!(
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS embedding vector({EMBEDDING_DIM})"
        );
        sqlx::query(&add_column)
            .execute(&mut *conn)
            .await
            .context("failed to add column 'users.embedding'")?;

        // ivfflat wants rows to train on; without the index search falls back to a scan.
        if let Err(e) = sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_users_embedding ON users USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&mut *conn)
        .await
        {
            warn!("Skipping embedding index: {e}");
        }
    }

    info!("Table 'users' ready");
    Ok(())
}

/// Drops `config.name` through the admin database. Used by the live tests to clean up.
#[cfg(test)]
pub async fn drop_database(config: &DatabaseConfig) -> Result<()> {
    let mut admin = PgConnection::connect_with(&connect_options(config, &config.admin_database))
        .await
        .with_context(|| format!("failed to connect to admin database '{}'", config.admin_database))?;

    let statement = format!(
        "DROP DATABASE IF EXISTS {} WITH (FORCE)",
        quote_ident(&config.name)?
    );
    sqlx::query(&statement)
        .execute(&mut admin)
        .await
        .with_context(|| format!("failed to drop database '{}'", config.name))?;

    admin.close().await.ok();
    info!("Database '{}' dropped", config.name);
    Ok(())
}

/// Quotes a PostgreSQL identifier. Identifiers cannot be bind parameters.
fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() {
        bail!("identifier must not be empty");
    }
    if name.contains('\0') {
        bail!("identifier must not contain NUL bytes");
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
