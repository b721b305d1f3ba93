//! PostgreSQL fixtures for tests that need a live server.
//!
//! Connection details come from the environment, falling back to the local
//! test container:
//!
//! | variable                 | default        |
//! |--------------------------|----------------|
//! | `SLUICE_TEST_PG_HOST`     | `localhost`    |
//! | `SLUICE_TEST_PG_PORT`     | `15434`        |
//! | `SLUICE_TEST_PG_DATABASE` | `sluice_test`  |
//! | `SLUICE_TEST_PG_USER`     | `sluice`       |
//! | `SLUICE_TEST_PG_PASSWORD` | `sluice_test`  |

use anyhow::{Context, Result};
use sluice_source::{ConnectionConfig, SslMode};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection settings for the test server.
#[derive(Debug, Clone)]
pub struct TestPgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl TestPgConfig {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        Self {
            host: var("SLUICE_TEST_PG_HOST", "localhost"),
            port: var("SLUICE_TEST_PG_PORT", "15434").parse().unwrap_or(15434),
            database: var("SLUICE_TEST_PG_DATABASE", "sluice_test"),
            username: var("SLUICE_TEST_PG_USER", "sluice"),
            password: var("SLUICE_TEST_PG_PASSWORD", "sluice_test"),
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Connector config pointed at `schema`.
    pub fn connection_config(&self, schema: &str) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            self.host.clone(),
            self.database.clone(),
            self.username.clone(),
            self.password.clone(),
        );
        config.port = self.port;
        config.schema = Some(schema.to_string());
        config.ssl_mode = SslMode::Disable;
        config
    }
}

/// A uniquely named schema dropped when the guard goes away.
pub struct PgTestSchema {
    pool: PgPool,
    config: TestPgConfig,
    schema_name: String,
}

impl PgTestSchema {
    pub async fn create() -> Result<Self> {
        let config = TestPgConfig::from_env();
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.connection_string())
            .await
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;

        let schema_name = format!("sluice_{}", Uuid::new_v4().simple());
        debug!("Creating test schema: {}", schema_name);
        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            config,
            schema_name,
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Connector config that discovers this schema only.
    pub fn connection_config(&self) -> ConnectionConfig {
        self.config.connection_config(&self.schema_name)
    }

    /// Run statements with this schema first on the search path.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET LOCAL search_path TO \"{}\"", self.schema_name))
            .execute(&mut *tx)
            .await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn cleanup(&self) -> Result<()> {
        debug!("Dropping test schema: {}", self.schema_name);
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.schema_name))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl Drop for PgTestSchema {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let schema_name = self.schema_name.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let sql = format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema_name);
                if let Err(e) = sqlx::query(&sql).execute(&pool).await {
                    warn!("Failed to drop test schema {}: {}", schema_name, e);
                }
            });
        } else {
            warn!("Not in async context, cannot drop schema: {}", self.schema_name);
        }
    }
}
