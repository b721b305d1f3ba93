//! Schema discovery: list tables, then describe each one on its own session.
//!
//! Per-table sessions come from [`ConnectionManager::acquire_concurrent`] and
//! are closed before the task reports back.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionManager, SessionGuard};
use crate::error::{Result, SourceError};
use crate::types::{Catalog, ColumnDescriptor, RawValue, TableSchema};

/// Build a catalog of every table visible to the configured credentials.
///
/// Column introspection fans out over at most `config.max_concurrency`
/// sessions. Any failure aborts the remaining work and no partial catalog is
/// returned. Tables appear in the order the store listed them.
pub async fn discover(manager: &ConnectionManager, config: &ConnectionConfig) -> Result<Catalog> {
    config.validate()?;
    let start = Instant::now();

    let tables = manager.with_session(config, list_tables).await?;
    debug!(tables = tables.len(), "Listed tables");

    let permits = Arc::new(Semaphore::new(config.max_concurrency));
    let mut tasks = JoinSet::new();

    for (index, table) in tables.iter().enumerate() {
        let manager = manager.clone();
        let config = config.clone();
        let permits = Arc::clone(&permits);
        let table = table.clone();

        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| SourceError::discovery(&table, e))?;
            let mut session = manager
                .acquire_concurrent(&config)
                .await
                .map_err(|e| scope_to_table(&table, e))?;
            let name = table.clone();
            let described = session.run(move |s| describe_table(s, &name)).await;
            let released = session.release().await;

            let schema = described.map_err(|e| scope_to_table(&table, e))?;
            released.map_err(|e| scope_to_table(&table, e))?;
            Ok::<_, SourceError>((index, schema))
        });
    }

    // On the first failure the semaphore closes so queued tables never open a
    // session; tables already in flight finish and release theirs.
    let mut slots: Vec<Option<TableSchema>> = vec![None; tables.len()];
    let mut failure: Option<SourceError> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| SourceError::listing(format!("describe task failed: {}", e)))
            .and_then(|result| result);
        match outcome {
            Ok((index, schema)) => slots[index] = Some(schema),
            Err(e) if failure.is_none() => {
                permits.close();
                failure = Some(e);
            }
            Err(e) => debug!(error = %e, "Ignoring error after discovery already failed"),
        }
    }
    if let Some(e) = failure {
        warn!(error = %e, "Discovery failed");
        return Err(e);
    }

    let schemas: Vec<TableSchema> = slots.into_iter().flatten().collect();
    if schemas.len() != tables.len() {
        return Err(SourceError::internal(format!(
            "described {} of {} tables",
            schemas.len(),
            tables.len()
        )));
    }

    info!(
        tables = schemas.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Discovery complete"
    );
    Ok(Catalog::new(schemas))
}

/// Describe one table on an already open session.
pub fn describe_table(session: &mut SessionGuard, table: &str) -> Result<TableSchema> {
    describe_table_on(session, table).map_err(|e| scope_to_table(table, e))
}

fn list_tables(session: &mut SessionGuard) -> Result<Vec<String>> {
    let sql = session.dialect().list_tables_sql(session.namespace());
    let rows = session.query_all(&sql).map_err(SourceError::listing)?;

    rows.into_iter()
        .map(|row| match row.into_iter().next() {
            Some(RawValue::Text(name)) => Ok(name),
            other => Err(SourceError::listing(format!(
                "table listing returned a non-text name: {:?}",
                other
            ))),
        })
        .collect()
}

fn describe_table_on(session: &mut SessionGuard, table: &str) -> Result<TableSchema> {
    let sql = session
        .dialect()
        .describe_columns_sql(session.namespace(), table);
    let rows = session
        .query_all(&sql)
        .map_err(|e| SourceError::discovery(table, e))?;

    let descriptors = rows
        .iter()
        .map(|row| ColumnDescriptor::from_row(table, row))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SourceError::discovery(table, e))?;

    debug!(table, columns = descriptors.len(), "Described table");
    Ok(TableSchema::from_descriptors(table, &descriptors))
}

/// Attach the table name to errors raised while describing it.
fn scope_to_table(table: &str, err: SourceError) -> SourceError {
    match err {
        SourceError::Discovery { table: Some(_), .. } => err,
        SourceError::Discovery {
            table: None,
            message,
        } => SourceError::discovery(table, message),
        other => SourceError::discovery(table, other),
    }
}
