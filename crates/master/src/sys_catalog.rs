//! Durable sys-catalog persistence.
//!
//! The in-memory catalog is a cache over an external durable, replicated
//! row store, consumed here through the narrow [`CatalogBackend`] trait.
//! This module owns the row schema (one row per table, per tablet, and per
//! reported replica), the key scheme, the postcard row codecs, and the
//! mutation counters that make the insert-once/update-thereafter contract
//! observable to tests and operators.
//!
//! Two backends are provided: [`RedbBackend`] for a real master process
//! and [`MemoryBackend`] for tests (with write-failure injection).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use quarry_types::{
    MasterError, ReplicaRole, Result, Schema, TableId, TabletId, TsId, codec,
};

/// Errors from a catalog backend.
#[derive(Debug, Snafu)]
pub enum BackendError {
    /// The underlying database reported a failure.
    #[snafu(display("Catalog database failure: {message}"))]
    Database {
        /// Rendered database error.
        message: String,
    },

    /// A test-injected write failure.
    #[snafu(display("Injected backend write failure"))]
    Injected,
}

/// Row-level access to the durable catalog store.
///
/// Writes are synchronous and strongly consistent with respect to the
/// current leader; callers tolerate multi-millisecond latency on every
/// call. `put_row` is an upsert; the insert/update distinction is kept by
/// [`SysCatalog`], which knows which keys it has written before.
pub trait CatalogBackend: Send + Sync + 'static {
    /// Writes one row, replacing any previous value under `key`.
    fn put_row(&self, key: &str, value: &[u8]) -> std::result::Result<(), BackendError>;

    /// Returns all rows whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, BackendError>;
}

// ============================================================================
// Backends
// ============================================================================

/// In-memory backend for tests.
#[derive(Default)]
pub struct MemoryBackend {
    rows: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every subsequent `put_row` fails until cleared.
    ///
    /// Used to verify that persistence failures abort operations with no
    /// partial in-memory apply.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Release);
    }
}

impl CatalogBackend for MemoryBackend {
    fn put_row(&self, key: &str, value: &[u8]) -> std::result::Result<(), BackendError> {
        if self.fail_puts.load(Ordering::Acquire) {
            return Err(BackendError::Injected);
        }
        self.rows.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, BackendError> {
        let rows = self.rows.read();
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

const SYS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sys_catalog");

/// redb-backed catalog store for a real master process.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Opens (or creates) the catalog database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Database`] if the file cannot be opened or
    /// the sys-catalog table cannot be created.
    pub fn open(path: impl AsRef<std::path::Path>) -> std::result::Result<Self, BackendError> {
        let db = Database::create(path).map_err(db_err)?;
        // Create the table up front so reads never race table creation.
        let tx = db.begin_write().map_err(db_err)?;
        tx.open_table(SYS_TABLE).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(Self { db })
    }
}

impl CatalogBackend for RedbBackend {
    fn put_row(&self, key: &str, value: &[u8]) -> std::result::Result<(), BackendError> {
        let tx = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = tx.open_table(SYS_TABLE).map_err(db_err)?;
            table.insert(key, value).map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, BackendError> {
        let tx = self.db.begin_read().map_err(db_err)?;
        let table = tx.open_table(SYS_TABLE).map_err(db_err)?;
        let mut rows = Vec::new();
        for entry in table.range(prefix..).map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            rows.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(rows)
    }
}

fn db_err<E: std::fmt::Display>(err: E) -> BackendError {
    BackendError::Database { message: err.to_string() }
}

// ============================================================================
// Rows
// ============================================================================

/// Creation state of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableState {
    /// Created in the catalog; waiting for every tablet to be reported.
    Creating,
    /// Every tablet has at least one reported replica.
    Running,
}

/// Durable row for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    /// Table id.
    pub table_id: TableId,
    /// Table name.
    pub name: String,
    /// Validated schema.
    pub schema: Schema,
    /// Replicas per tablet.
    pub replication_factor: u32,
    /// Creation state.
    pub state: TableState,
}

/// Durable row for one tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletRow {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Owning table.
    pub table_id: TableId,
    /// Inclusive start of the tablet's key range; empty means unbounded.
    pub start_key: Vec<u8>,
    /// Exclusive end of the tablet's key range; empty means unbounded.
    pub end_key: Vec<u8>,
}

/// Durable row for one reported replica of a tablet.
///
/// Inserted the first time a given (tablet, server) pair is reported and
/// updated when its term or role advances. This is what makes replica
/// reports observable through the mutation counters without ever
/// duplicating a tablet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRow {
    /// The reported tablet.
    pub tablet_id: TabletId,
    /// The hosting server.
    pub ts_id: TsId,
    /// Last recorded role.
    pub role: ReplicaRole,
    /// Last recorded term.
    pub term: u64,
}

fn table_key(id: TableId) -> String {
    format!("table/{id}")
}

fn tablet_key(id: TabletId) -> String {
    format!("tablet/{id}")
}

fn replica_key(tablet: TabletId, ts: TsId) -> String {
    format!("replica/{tablet}/{ts}")
}

// ============================================================================
// SysCatalog
// ============================================================================

/// Mutation counters over the sys catalog.
///
/// Counters are per master process: a restarted master starts from zero,
/// so tests measure deltas across restarts directly.
#[derive(Debug, Default)]
pub struct CatalogMetrics {
    rows_inserted: AtomicU64,
    rows_updated: AtomicU64,
}

impl CatalogMetrics {
    /// Rows inserted since this master started.
    #[must_use]
    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted.load(Ordering::Relaxed)
    }

    /// Rows updated since this master started.
    #[must_use]
    pub fn rows_updated(&self) -> u64 {
        self.rows_updated.load(Ordering::Relaxed)
    }
}

/// Everything the durable store knows, as read by a full startup scan.
#[derive(Debug, Default)]
pub struct LoadedCatalog {
    /// All table rows.
    pub tables: Vec<TableRow>,
    /// All tablet rows.
    pub tablets: Vec<TabletRow>,
    /// All replica rows.
    pub replicas: Vec<ReplicaRow>,
}

/// Typed access to the durable sys catalog.
///
/// Wraps a [`CatalogBackend`] with the row codecs, the key scheme, and the
/// insert/update counters. All errors surface as
/// [`MasterError::Storage`]; callers abort their whole operation on any
/// failure here.
pub struct SysCatalog {
    backend: Arc<dyn CatalogBackend>,
    metrics: CatalogMetrics,
}

impl SysCatalog {
    /// Creates a sys catalog over a backend.
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self { backend, metrics: CatalogMetrics::default() }
    }

    /// The mutation counters.
    #[must_use]
    pub fn metrics(&self) -> &CatalogMetrics {
        &self.metrics
    }

    /// Inserts the row for a newly created table.
    pub fn insert_table(&self, row: &TableRow) -> Result<()> {
        self.put(&table_key(row.table_id), row, WriteKind::Insert)
    }

    /// Updates an existing table row (e.g. the `Creating` → `Running`
    /// transition).
    pub fn update_table(&self, row: &TableRow) -> Result<()> {
        self.put(&table_key(row.table_id), row, WriteKind::Update)
    }

    /// Inserts the row for a newly created tablet.
    pub fn insert_tablet(&self, row: &TabletRow) -> Result<()> {
        self.put(&tablet_key(row.tablet_id), row, WriteKind::Insert)
    }

    /// Inserts the row for a first-time reported replica.
    pub fn insert_replica(&self, row: &ReplicaRow) -> Result<()> {
        self.put(&replica_key(row.tablet_id, row.ts_id), row, WriteKind::Insert)
    }

    /// Updates an existing replica row after a term or role change.
    pub fn update_replica(&self, row: &ReplicaRow) -> Result<()> {
        self.put(&replica_key(row.tablet_id, row.ts_id), row, WriteKind::Update)
    }

    /// Reads the entire catalog, for the startup/role-transition rebuild.
    pub fn load(&self) -> Result<LoadedCatalog> {
        let mut loaded = LoadedCatalog::default();
        for (_, bytes) in self.scan("table/")? {
            loaded.tables.push(codec::decode(&bytes).map_err(MasterError::storage)?);
        }
        for (_, bytes) in self.scan("tablet/")? {
            loaded.tablets.push(codec::decode(&bytes).map_err(MasterError::storage)?);
        }
        for (_, bytes) in self.scan("replica/")? {
            loaded.replicas.push(codec::decode(&bytes).map_err(MasterError::storage)?);
        }
        Ok(loaded)
    }

    fn put<T: Serialize>(&self, key: &str, row: &T, kind: WriteKind) -> Result<()> {
        let bytes = codec::encode(row).map_err(MasterError::storage)?;
        self.backend.put_row(key, &bytes).map_err(MasterError::storage)?;
        match kind {
            WriteKind::Insert => self.metrics.rows_inserted.fetch_add(1, Ordering::Relaxed),
            WriteKind::Update => self.metrics.rows_updated.fetch_add(1, Ordering::Relaxed),
        };
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.backend.scan_prefix(prefix).map_err(MasterError::storage)
    }
}

#[derive(Clone, Copy)]
enum WriteKind {
    Insert,
    Update,
}
