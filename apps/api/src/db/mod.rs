pub mod bootstrap;
pub mod raw;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Failures surfaced by the database access layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// No connection could be checked out of the pool in time, or the pool is closed.
    #[error("connection pool exhausted: {0}")]
    Acquire(#[source] sqlx::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("no value bound for query parameter ':{0}'")]
    MissingParam(String),

    #[error("cannot decode column '{column}' of type {type_name}: {reason}")]
    Decode {
        column: String,
        type_name: String,
        reason: String,
    },
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
            return DbError::Acquire(err);
        }

        let unique_violation = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);

        if unique_violation {
            DbError::UniqueViolation(err)
        } else {
            DbError::Query(err)
        }
    }
}

/// Connection options for `database` on the configured server.
pub fn connect_options(config: &DatabaseConfig, database: &str) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(database);

    if config.log_statements {
        options
    } else {
        options.disable_statement_logging()
    }
}

/// Handle to the shared PostgreSQL pool. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Creates the bounded connection pool for the target database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{} (pool size {})",
            config.host, config.port, config.name, config.pool_size
        );

        let pool = pool_options(config)
            .connect_with(connect_options(config, &config.name))
            .await?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Creates the pool without opening any connection until first use.
    #[cfg(test)]
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let pool = pool_options(config).connect_lazy_with(connect_options(config, &config.name));
        Self { pool }
    }

    /// Checks a connection out of the pool and opens a unit of work on it.
    pub async fn session(&self) -> Result<Session, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Session { tx })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(config.pre_ping)
}

/// One unit of work bound to a pooled connection.
///
/// Changes become visible only after [`Session::commit`]. A session dropped
/// without committing is rolled back and its connection returned to the pool,
/// whichever way the caller exits.
pub struct Session {
    tx: Transaction<'static, Postgres>,
}

impl Session {
    /// Executor for statements inside this session.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
