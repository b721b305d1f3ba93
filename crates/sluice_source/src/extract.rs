//! Streaming extraction over one session.
//!
//! [`Extraction`] walks the selection table by table. It holds at most one
//! open cursor at a time and yields each envelope before fetching the next
//! row. Dropping it, at any point, closes the cursor and then the session.

use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::connection::{ScopedCursor, SessionGuard};
use crate::error::{Result, SourceError};
use crate::normalize::normalize;
use crate::sql::projection_query;
use crate::types::{ConfiguredSelection, ConfiguredTable, RecordEnvelope};

/// Start a lazy extraction of `selection` over `session`.
pub fn read(session: SessionGuard, selection: ConfiguredSelection) -> Extraction {
    Extraction::new(session, selection)
}

struct ActiveTable {
    table: ConfiguredTable,
    cursor: ScopedCursor,
    rows: u64,
    started: Instant,
}

/// Iterator of normalized records. Finite and single pass.
pub struct Extraction {
    pending: VecDeque<ConfiguredTable>,
    current: Option<ActiveTable>,
    session: Option<SessionGuard>,
    total_rows: u64,
}

impl Extraction {
    fn new(session: SessionGuard, selection: ConfiguredSelection) -> Self {
        Self {
            pending: selection.into_iter().collect(),
            current: None,
            session: Some(session),
            total_rows: 0,
        }
    }

    /// Rows yielded so far, across all tables.
    pub fn rows_emitted(&self) -> u64 {
        self.total_rows
    }

    /// Open a cursor on the next table with a non-empty projection.
    ///
    /// Returns `Ok(false)` once the selection is exhausted.
    fn start_next_table(&mut self) -> Result<bool> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };

        while let Some(table) = self.pending.pop_front() {
            if table.columns.is_empty() {
                warn!(table = %table.name, "No columns selected, skipping table");
                continue;
            }

            let sql = projection_query(
                session.dialect(),
                session.namespace(),
                &table.name,
                &table.columns,
            );
            debug!(table = %table.name, columns = table.columns.len(), "Opening cursor");

            let mut cursor = session
                .open_cursor()
                .map_err(|e| SourceError::extraction(&table.name, e))?;
            cursor
                .execute(&sql)
                .map_err(|e| SourceError::extraction(&table.name, e))?;

            self.current = Some(ActiveTable {
                table,
                cursor,
                rows: 0,
                started: Instant::now(),
            });
            return Ok(true);
        }
        Ok(false)
    }

    /// Close the current table's cursor after it ran dry.
    fn finish_table(&mut self) -> Result<()> {
        let Some(active) = self.current.take() else {
            return Ok(());
        };
        let ActiveTable {
            table,
            cursor,
            rows,
            started,
        } = active;
        cursor
            .close()
            .map_err(|e| SourceError::extraction(&table.name, e))?;
        info!(
            table = %table.name,
            rows,
            duration_ms = started.elapsed().as_millis() as u64,
            "Table read complete"
        );
        Ok(())
    }

    /// Pull the next envelope, opening and closing cursors as tables start
    /// and finish.
    fn advance(&mut self) -> Result<Option<RecordEnvelope>> {
        loop {
            if self.current.is_none() && !self.start_next_table()? {
                return Ok(None);
            }
            let Some(active) = self.current.as_mut() else {
                continue;
            };

            let fetched = active
                .cursor
                .fetch_one()
                .map_err(|e| SourceError::extraction(&active.table.name, e))?;

            match fetched {
                Some(row) => {
                    let table = &active.table;
                    if let Some(envelope) = normalize(&table.name, &table.columns, row)? {
                        active.rows += 1;
                        return Ok(Some(envelope));
                    }
                }
                None => self.finish_table()?,
            }
        }
    }

    /// Release the cursor, then the session. Safe to call repeatedly.
    fn shutdown(&mut self) {
        if let Some(active) = self.current.take() {
            if let Err(e) = active.cursor.close() {
                warn!(table = %active.table.name, error = %e, "Failed to close cursor");
            }
        }
        self.pending.clear();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.release() {
                warn!(error = %e, "Failed to release session");
            }
        }
    }
}

impl Iterator for Extraction {
    type Item = Result<RecordEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.session.as_ref()?;

        match self.advance() {
            Ok(Some(envelope)) => {
                self.total_rows += 1;
                Some(Ok(envelope))
            }
            Ok(None) => {
                self.shutdown();
                info!(rows = self.total_rows, "Data read complete");
                None
            }
            Err(e) => {
                self.shutdown();
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Extraction {}

impl Drop for Extraction {
    fn drop(&mut self) {
        self.shutdown();
    }
}
