use super::{MemoryRow, MemorySession};
use crate::core::{Result, RouterError};
use crate::interface::{Engine, EngineFactory};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Level, event};

pub(crate) type Tables = HashMap<String, Vec<MemoryRow>>;

/// Operations that can be made to fail with [`MemoryEngine::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    NewSession,
    Ping,
    Begin,
    Commit,
    Rollback,
    Find,
    Count,
    Update,
    Insert,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) sessions_opened: AtomicU64,
    pub(crate) sessions_closed: AtomicU64,
    pub(crate) pings: AtomicU64,
    pub(crate) begins: AtomicU64,
    pub(crate) commits: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
    pub(crate) finds: AtomicU64,
    pub(crate) counts: AtomicU64,
    pub(crate) updates: AtomicU64,
    pub(crate) inserts: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of an engine's call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub pings: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub finds: u64,
    pub counts: u64,
    pub updates: u64,
    pub inserts: u64,
}

impl EngineStats {
    /// Calls of any kind that reached the engine.
    pub fn total_calls(&self) -> u64 {
        self.sessions_opened
            + self.pings
            + self.begins
            + self.commits
            + self.rollbacks
            + self.finds
            + self.counts
            + self.updates
            + self.inserts
    }

    pub fn open_sessions(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}

#[derive(Default)]
struct Controls {
    faults: HashMap<MemoryOp, VecDeque<String>>,
    latency: Option<Duration>,
}

struct Shared {
    name: String,
    tables: Mutex<Tables>,
    controls: Mutex<Controls>,
    counters: Counters,
}

/// In-process engine backed by a table map.
///
/// Clones share the same tables and counters. Sessions see committed data
/// immediately; a transaction works on a private copy of the tables and
/// publishes the tables it wrote to on commit.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tables: Mutex::new(Tables::new()),
                controls: Mutex::new(Controls::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        EngineStats {
            sessions_opened: load(&c.sessions_opened),
            sessions_closed: load(&c.sessions_closed),
            pings: load(&c.pings),
            begins: load(&c.begins),
            commits: load(&c.commits),
            rollbacks: load(&c.rollbacks),
            finds: load(&c.finds),
            counts: load(&c.counts),
            updates: load(&c.updates),
            inserts: load(&c.inserts),
        }
    }

    /// Makes the next `op` on this engine fail with `message`.
    ///
    /// Queued failures are consumed one per call, in order.
    pub async fn fail_next(&self, op: MemoryOp, message: impl Into<String>) {
        let mut controls = self.shared.controls.lock().await;
        controls.faults.entry(op).or_default().push_back(message.into());
    }

    /// Delays every query (find, count, update, insert) by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.shared.controls.lock().await.latency = latency;
    }

    /// Appends committed rows to `table`.
    pub async fn seed(&self, table: &str, rows: impl IntoIterator<Item = MemoryRow>) {
        let mut tables = self.shared.tables.lock().await;
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// Committed rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<MemoryRow> {
        let tables = self.shared.tables.lock().await;
        tables.get(table).cloned().unwrap_or_default()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.shared.counters
    }

    pub(crate) fn tables(&self) -> &Mutex<Tables> {
        &self.shared.tables
    }

    /// Applies configured latency and consumes a queued failure for `op`.
    pub(crate) async fn check(&self, op: MemoryOp) -> Result<()> {
        let (fault, latency) = {
            let mut controls = self.shared.controls.lock().await;
            let fault = controls.faults.get_mut(&op).and_then(VecDeque::pop_front);
            (fault, controls.latency)
        };

        let is_query = matches!(
            op,
            MemoryOp::Find | MemoryOp::Count | MemoryOp::Update | MemoryOp::Insert
        );
        if let (true, Some(latency)) = (is_query, latency) {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(message) => {
                event!(Level::DEBUG, engine = %self.shared.name, ?op, "injected failure");
                Err(RouterError::backend(format!("{}: {}", self.shared.name, message)))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Session = MemorySession;

    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn new_session(&self) -> Result<MemorySession> {
        self.check(MemoryOp::NewSession).await?;
        Counters::bump(&self.shared.counters.sessions_opened);
        Ok(MemorySession::new(self.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Counters::bump(&self.shared.counters.pings);
        self.check(MemoryOp::Ping).await
    }
}

/// Connects `memory://<name>` DSNs. Connecting the same name twice returns
/// the same engine.
#[derive(Clone, Default)]
pub struct MemoryEngineFactory {
    engines: Arc<Mutex<HashMap<String, MemoryEngine>>>,
}

impl MemoryEngineFactory {
    pub const SCHEME: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    /// Engine previously connected under `name`.
    pub async fn engine(&self, name: &str) -> Option<MemoryEngine> {
        self.engines.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl EngineFactory for MemoryEngineFactory {
    type Engine = MemoryEngine;

    async fn connect(&self, dsn: &str) -> Result<MemoryEngine> {
        let name = dsn
            .strip_prefix(Self::SCHEME)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                RouterError::InvalidConfig(format!(
                    "memory DSN must look like '{}<name>', got '{}'",
                    Self::SCHEME,
                    dsn
                ))
            })?;

        let mut engines = self.engines.lock().await;
        let engine = engines
            .entry(name.to_string())
            .or_insert_with(|| MemoryEngine::new(name))
            .clone();
        Ok(engine)
    }
}
