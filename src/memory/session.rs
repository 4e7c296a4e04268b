use super::engine::{Counters, MemoryOp, Tables};
use super::{MemoryEngine, MemoryRow, eval};
use crate::core::{Result, RouterError};
use crate::interface::{Engine, QuerySession, Session};
use crate::query::{FindQuery, UpdateQuery};
use async_trait::async_trait;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    InTransaction,
    Closed,
}

/// Session on a [`MemoryEngine`].
///
/// Outside a transaction every statement applies to the engine's tables
/// directly. Inside one, statements see a private copy; commit publishes
/// each table the transaction wrote to, replacing the committed version.
pub struct MemorySession {
    engine: MemoryEngine,
    state: SessionState,
    working: Option<Tables>,
    touched: HashSet<String>,
}

impl MemorySession {
    pub(crate) fn new(engine: MemoryEngine) -> Self {
        Self {
            engine,
            state: SessionState::Active,
            working: None,
            touched: HashSet::new(),
        }
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    /// Appends one row to `table`.
    pub async fn insert(&mut self, table: &str, row: MemoryRow) -> Result<u64> {
        self.ensure_open()?;
        Counters::bump(&self.engine.counters().inserts);
        self.engine.check(MemoryOp::Insert).await?;
        self.with_rows_mut(table, |rows| {
            rows.push(row);
            Ok(1)
        })
        .await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(RouterError::SessionClosed(format!(
                "memory session on {}",
                self.engine.name()
            )));
        }
        Ok(())
    }

    fn ensure_transaction(&self) -> Result<()> {
        if self.state != SessionState::InTransaction {
            return Err(RouterError::TransactionAbsent(format!(
                "memory session on {}",
                self.engine.name()
            )));
        }
        Ok(())
    }

    async fn with_rows<R>(&self, table: &str, read: impl FnOnce(&[MemoryRow]) -> Result<R>) -> Result<R> {
        if let Some(working) = &self.working {
            return read(working.get(table).map_or(&[][..], Vec::as_slice));
        }
        let tables = self.engine.tables().lock().await;
        read(tables.get(table).map_or(&[][..], Vec::as_slice))
    }

    async fn with_rows_mut<R>(
        &mut self,
        table: &str,
        write: impl FnOnce(&mut Vec<MemoryRow>) -> Result<R>,
    ) -> Result<R> {
        if let Some(working) = &mut self.working {
            self.touched.insert(table.to_string());
            return write(working.entry(table.to_string()).or_default());
        }
        let mut tables = self.engine.tables().lock().await;
        write(tables.entry(table.to_string()).or_default())
    }

    fn end_transaction(&mut self) -> Option<Tables> {
        self.state = SessionState::Active;
        self.working.take()
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::InTransaction {
            return Err(RouterError::TransactionAlreadyActive(format!(
                "memory session on {}",
                self.engine.name()
            )));
        }
        Counters::bump(&self.engine.counters().begins);
        self.engine.check(MemoryOp::Begin).await?;

        let snapshot = self.engine.tables().lock().await.clone();
        self.working = Some(snapshot);
        self.touched.clear();
        self.state = SessionState::InTransaction;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_transaction()?;
        Counters::bump(&self.engine.counters().commits);
        self.engine.check(MemoryOp::Commit).await?;

        let Some(mut working) = self.end_transaction() else {
            return Ok(());
        };
        let mut tables = self.engine.tables().lock().await;
        for table in self.touched.drain() {
            if let Some(rows) = working.remove(&table) {
                tables.insert(table, rows);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_transaction()?;
        Counters::bump(&self.engine.counters().rollbacks);
        // The private copy is discarded even when the rollback reports an error.
        self.end_transaction();
        self.touched.clear();
        self.engine.check(MemoryOp::Rollback).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.end_transaction();
        self.touched.clear();
        self.state = SessionState::Closed;
        Counters::bump(&self.engine.counters().sessions_closed);
        Ok(())
    }

    fn is_in_transaction(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

#[async_trait]
impl QuerySession for MemorySession {
    type Row = MemoryRow;

    async fn find(&mut self, query: &FindQuery) -> Result<Vec<MemoryRow>> {
        self.ensure_open()?;
        Counters::bump(&self.engine.counters().finds);
        self.engine.check(MemoryOp::Find).await?;
        self.with_rows(&query.table, |rows| eval::select(rows, query)).await
    }

    async fn count(&mut self, query: &FindQuery) -> Result<i64> {
        self.ensure_open()?;
        Counters::bump(&self.engine.counters().counts);
        self.engine.check(MemoryOp::Count).await?;
        let counted = self.with_rows(&query.table, |rows| eval::count(rows, query)).await?;
        Ok(counted as i64)
    }

    async fn update(&mut self, update: &UpdateQuery) -> Result<u64> {
        self.ensure_open()?;
        Counters::bump(&self.engine.counters().updates);
        self.engine.check(MemoryOp::Update).await?;
        self.with_rows_mut(&update.table, |rows| eval::apply_update(rows, update))
            .await
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            Counters::bump(&self.engine.counters().sessions_closed);
        }
    }
}
