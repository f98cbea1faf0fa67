//! The in-memory catalog: tables, tablets, and reported replicas.
//!
//! The catalog is a write-through cache over the durable sys catalog,
//! rebuilt exclusively from a full scan on startup or role transition.
//! Structural mutations (new table, new tablet) serialize on the map lock;
//! per-tablet replica state sits behind each tablet's own lock so reports
//! for one tablet never block reads of another.
//!
//! Every public operation takes a [`LeaderLease`], so the compiler enforces
//! the gate-before-touch rule: callers cannot reach catalog state without
//! having acquired the leader gate for this operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use snafu::OptionExt;

use quarry_types::{
    MasterError, ReplicaRole, Result, Schema, TableId, TabletId, TabletReplica, TsId,
    error::{AlreadyExistsSnafu, InvalidSchemaSnafu, NotFoundSnafu},
};
use quarry_wire::heartbeat::TabletAssignment;

use crate::leader_gate::LeaderLease;
use crate::sys_catalog::{
    CatalogBackend, CatalogMetrics, ReplicaRow, SysCatalog, TableRow, TableState, TabletRow,
};

/// Immutable identity of a table plus its mutable creation state.
#[derive(Debug)]
pub struct TableInfo {
    /// Table id.
    pub table_id: TableId,
    /// Table name.
    pub name: String,
    /// Validated schema.
    pub schema: Schema,
    /// Replicas per tablet.
    pub replication_factor: u32,
    /// The table's tablets, fixed at creation.
    pub tablet_ids: Vec<TabletId>,
    state: RwLock<TableState>,
}

impl TableInfo {
    /// Current creation state.
    #[must_use]
    pub fn state(&self) -> TableState {
        *self.state.read()
    }

    fn to_row(&self, state: TableState) -> TableRow {
        TableRow {
            table_id: self.table_id,
            name: self.name.clone(),
            schema: self.schema.clone(),
            replication_factor: self.replication_factor,
            state,
        }
    }
}

/// A tablet and its replica state.
#[derive(Debug)]
pub struct TabletInfo {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Owning table.
    pub table_id: TableId,
    /// Replicas per this tablet, copied from the owning table.
    pub replication_factor: u32,
    replicas: RwLock<ReplicaSet>,
}

/// Reported and pending replicas of one tablet.
///
/// `pending` tracks in-memory assignment offers that have not yet been
/// reported back; offers are never persisted, so a master restart drops
/// and re-issues them.
#[derive(Debug, Default)]
struct ReplicaSet {
    reported: BTreeMap<TsId, TabletReplica>,
    pending: BTreeSet<TsId>,
}

impl TabletInfo {
    /// The best-known replica set, leaders first.
    #[must_use]
    pub fn reported_replicas(&self) -> Vec<TabletReplica> {
        let set = self.replicas.read();
        let mut replicas: Vec<_> = set.reported.values().copied().collect();
        replicas.sort_by_key(|r| (r.role != ReplicaRole::Leader, r.ts_id));
        replicas
    }

    fn has_reported_replica(&self) -> bool {
        !self.replicas.read().reported.is_empty()
    }
}

/// Outcome of applying one tablet-report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// First report of this (tablet, server) pair; a replica row was
    /// inserted.
    Inserted,
    /// Term or role advanced; the replica row was updated.
    Updated,
    /// Same term and role as recorded; nothing written.
    Unchanged,
    /// Lower term than recorded; absorbed without error.
    Stale,
    /// The reported tablet is not in the catalog.
    UnknownTablet,
}

#[derive(Default)]
struct CatalogMaps {
    tables_by_name: HashMap<String, Arc<TableInfo>>,
    tables_by_id: HashMap<TableId, Arc<TableInfo>>,
    tablets: HashMap<TabletId, Arc<TabletInfo>>,
}

/// The catalog manager.
pub struct CatalogManager {
    sys: SysCatalog,
    maps: RwLock<CatalogMaps>,
}

impl CatalogManager {
    /// Creates an empty, unloaded catalog over a backend.
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self { sys: SysCatalog::new(backend), maps: RwLock::new(CatalogMaps::default()) }
    }

    /// The sys-catalog mutation counters.
    #[must_use]
    pub fn metrics(&self) -> &CatalogMetrics {
        self.sys.metrics()
    }

    /// Rebuilds the in-memory catalog from a full scan of the durable
    /// store, replacing whatever was cached before.
    ///
    /// Runs before the leader gate opens (the oracle reports `NotReady`
    /// until this returns), so no lease is required.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Storage`] if the scan or any row decode
    /// fails; the previous cache is left untouched in that case.
    pub fn load_from_backend(&self) -> Result<()> {
        let loaded = self.sys.load()?;
        let mut maps = CatalogMaps::default();

        for row in loaded.tables {
            let table = Arc::new(TableInfo {
                table_id: row.table_id,
                name: row.name.clone(),
                schema: row.schema,
                replication_factor: row.replication_factor,
                tablet_ids: Vec::new(),
                state: RwLock::new(row.state),
            });
            maps.tables_by_name.insert(row.name, Arc::clone(&table));
            maps.tables_by_id.insert(row.table_id, table);
        }

        let mut tablets_by_table: HashMap<TableId, Vec<TabletId>> = HashMap::new();
        for row in loaded.tablets {
            let Some(table) = maps.tables_by_id.get(&row.table_id) else {
                // A create-table that persisted its tablet row but failed
                // before the table row; harmless residue, not served.
                tracing::warn!(
                    tablet_id = %row.tablet_id,
                    table_id = %row.table_id,
                    "Skipping orphan tablet row with no table"
                );
                continue;
            };
            let tablet = Arc::new(TabletInfo {
                tablet_id: row.tablet_id,
                table_id: row.table_id,
                replication_factor: table.replication_factor,
                replicas: RwLock::new(ReplicaSet::default()),
            });
            tablets_by_table.entry(row.table_id).or_default().push(row.tablet_id);
            maps.tablets.insert(row.tablet_id, tablet);
        }

        for row in loaded.replicas {
            let Some(tablet) = maps.tablets.get(&row.tablet_id) else {
                tracing::warn!(
                    tablet_id = %row.tablet_id,
                    ts_id = %row.ts_id,
                    "Skipping replica row for unknown tablet"
                );
                continue;
            };
            tablet.replicas.write().reported.insert(
                row.ts_id,
                TabletReplica { ts_id: row.ts_id, role: row.role, term: row.term },
            );
        }

        // tablet_ids on TableInfo is immutable after publication, so
        // rebuild the table entries that have tablets.
        for (table_id, tablet_ids) in tablets_by_table {
            if let Some(table) = maps.tables_by_id.get(&table_id) {
                let rebuilt = Arc::new(TableInfo {
                    table_id: table.table_id,
                    name: table.name.clone(),
                    schema: table.schema.clone(),
                    replication_factor: table.replication_factor,
                    tablet_ids,
                    state: RwLock::new(table.state()),
                });
                maps.tables_by_name.insert(rebuilt.name.clone(), Arc::clone(&rebuilt));
                maps.tables_by_id.insert(table_id, rebuilt);
            }
        }

        let table_count = maps.tables_by_id.len();
        let tablet_count = maps.tablets.len();
        *self.maps.write() = maps;
        tracing::info!(tables = table_count, tablets = tablet_count, "Catalog loaded");
        Ok(())
    }

    /// Creates a table with one tablet spanning the whole key range.
    ///
    /// Persists the tablet row and then the table row (two inserts), and
    /// only then publishes both in memory, so a persistence failure aborts
    /// with nothing applied. The tablet-first order means a crash between
    /// the two writes leaves only an orphan tablet row, which the loader
    /// skips, never a table that looks complete with no tablets.
    ///
    /// # Errors
    ///
    /// - [`MasterError::AlreadyExists`] if the name is taken.
    /// - [`MasterError::InvalidSchema`] if `replication_factor` is zero.
    /// - [`MasterError::Storage`] on persistence failure.
    pub fn create_table(
        &self,
        _lease: &LeaderLease,
        name: &str,
        schema: Schema,
        replication_factor: u32,
    ) -> Result<TableId> {
        snafu::ensure!(
            replication_factor >= 1,
            InvalidSchemaSnafu { reason: "replication factor must be at least 1" }
        );

        let mut maps = self.maps.write();
        snafu::ensure!(
            !maps.tables_by_name.contains_key(name),
            AlreadyExistsSnafu { name: name.to_string() }
        );

        let table_id = TableId::generate();
        let tablet_id = TabletId::generate();
        let table = Arc::new(TableInfo {
            table_id,
            name: name.to_string(),
            schema,
            replication_factor,
            tablet_ids: vec![tablet_id],
            state: RwLock::new(TableState::Creating),
        });
        let tablet = Arc::new(TabletInfo {
            tablet_id,
            table_id,
            replication_factor,
            replicas: RwLock::new(ReplicaSet::default()),
        });

        self.sys.insert_tablet(&TabletRow {
            tablet_id,
            table_id,
            start_key: Vec::new(),
            end_key: Vec::new(),
        })?;
        self.sys.insert_table(&table.to_row(TableState::Creating))?;

        maps.tables_by_name.insert(table.name.clone(), Arc::clone(&table));
        maps.tables_by_id.insert(table_id, table);
        maps.tablets.insert(tablet_id, tablet);

        tracing::info!(%table_id, %tablet_id, name, replication_factor, "Created table");
        Ok(table_id)
    }

    /// True once every tablet of the table has a reported replica.
    ///
    /// The first poll that observes completion persists the table's
    /// `Creating` → `Running` transition. Safe to call at arbitrary
    /// frequency.
    ///
    /// # Errors
    ///
    /// - [`MasterError::NotFound`] if the table never existed.
    /// - [`MasterError::Storage`] if the state transition fails to
    ///   persist; the table stays `Creating` and a later poll retries.
    pub fn is_create_table_done(&self, _lease: &LeaderLease, name: &str) -> Result<bool> {
        let (table, tablets) = self.table_with_tablets(name)?;
        self.check_creation_done(&table, &tablets)
    }

    /// Returns the table's schema and whether creation has completed.
    ///
    /// # Errors
    ///
    /// Same as [`is_create_table_done`](Self::is_create_table_done).
    pub fn get_table_schema(
        &self,
        _lease: &LeaderLease,
        name: &str,
    ) -> Result<(TableId, Schema, bool)> {
        let (table, tablets) = self.table_with_tablets(name)?;
        let done = self.check_creation_done(&table, &tablets)?;
        Ok((table.table_id, table.schema.clone(), done))
    }

    /// The current best-known replica set of a tablet, leaders first.
    ///
    /// Empty until a server first reports the tablet.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::NotFound`] for an unknown tablet.
    pub fn get_tablet_locations(
        &self,
        _lease: &LeaderLease,
        tablet_id: TabletId,
    ) -> Result<Vec<TabletReplica>> {
        let tablet = self
            .maps
            .read()
            .tablets
            .get(&tablet_id)
            .cloned()
            .context(NotFoundSnafu { entity: "tablet", id: tablet_id.to_string() })?;
        Ok(tablet.reported_replicas())
    }

    /// The replica sets of every tablet of a table, in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::NotFound`] if the table never existed.
    pub fn get_table_locations(
        &self,
        _lease: &LeaderLease,
        name: &str,
    ) -> Result<Vec<(TabletId, Vec<TabletReplica>)>> {
        let (_, tablets) = self.table_with_tablets(name)?;
        Ok(tablets.iter().map(|t| (t.tablet_id, t.reported_replicas())).collect())
    }

    /// Applies one replica's reported state to a tablet.
    ///
    /// Idempotent upsert: a new reporter inserts a replica row, a term or
    /// role advance updates it, an identical report writes nothing, and a
    /// report older than the recorded term is absorbed as
    /// [`ReportOutcome::Stale`] without error.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Storage`] if the replica row write fails;
    /// in-memory state is untouched in that case.
    pub fn apply_tablet_report(
        &self,
        _lease: &LeaderLease,
        tablet_id: TabletId,
        reporter: TsId,
        term: u64,
        role: ReplicaRole,
    ) -> Result<ReportOutcome> {
        let Some(tablet) = self.maps.read().tablets.get(&tablet_id).cloned() else {
            return Ok(ReportOutcome::UnknownTablet);
        };

        let mut set = tablet.replicas.write();
        let recorded = set.reported.get(&reporter).copied();
        let outcome = match recorded {
            Some(recorded) if term < recorded.term => ReportOutcome::Stale,
            Some(recorded) if term == recorded.term && role == recorded.role => {
                ReportOutcome::Unchanged
            },
            Some(_) => {
                self.sys.update_replica(&ReplicaRow { tablet_id, ts_id: reporter, role, term })?;
                set.reported
                    .insert(reporter, TabletReplica { ts_id: reporter, role, term });
                ReportOutcome::Updated
            },
            None => {
                self.sys.insert_replica(&ReplicaRow { tablet_id, ts_id: reporter, role, term })?;
                set.reported
                    .insert(reporter, TabletReplica { ts_id: reporter, role, term });
                set.pending.remove(&reporter);
                ReportOutcome::Inserted
            },
        };

        if outcome == ReportOutcome::Stale {
            tracing::debug!(
                %tablet_id,
                reporter = %reporter,
                term,
                "Absorbed stale tablet report"
            );
        }
        Ok(outcome)
    }

    /// Offers under-replicated tablets to a heartbeating server.
    ///
    /// Returns up to `max` tablets whose reported-plus-pending replica
    /// count is below the table's replication factor and which the server
    /// neither hosts nor has pending, marking each as pending for the
    /// server. Offers live only in memory; they are re-issued after a
    /// master restart and cleared when the server reports the replica.
    pub fn assign_tablets(
        &self,
        _lease: &LeaderLease,
        ts_id: TsId,
        max: usize,
    ) -> Vec<TabletAssignment> {
        let tablets: Vec<_> = self.maps.read().tablets.values().cloned().collect();
        let mut assignments = Vec::new();
        for tablet in tablets {
            if assignments.len() >= max {
                break;
            }
            let mut set = tablet.replicas.write();
            let replica_count = set.reported.len() + set.pending.len();
            if replica_count >= tablet.replication_factor as usize
                || set.reported.contains_key(&ts_id)
                || set.pending.contains(&ts_id)
            {
                continue;
            }
            set.pending.insert(ts_id);
            assignments.push(TabletAssignment {
                tablet_id: tablet.tablet_id,
                table_id: tablet.table_id,
            });
        }
        if !assignments.is_empty() {
            tracing::info!(ts_id = %ts_id, count = assignments.len(), "Assigned tablets");
        }
        assignments
    }

    fn table_with_tablets(&self, name: &str) -> Result<(Arc<TableInfo>, Vec<Arc<TabletInfo>>)> {
        let maps = self.maps.read();
        let table = maps
            .tables_by_name
            .get(name)
            .cloned()
            .context(NotFoundSnafu { entity: "table", id: name.to_string() })?;
        let tablets = table
            .tablet_ids
            .iter()
            .filter_map(|id| maps.tablets.get(id).cloned())
            .collect();
        Ok((table, tablets))
    }

    fn check_creation_done(
        &self,
        table: &Arc<TableInfo>,
        tablets: &[Arc<TabletInfo>],
    ) -> Result<bool> {
        // Double-checked under the state write lock so the Running
        // transition is persisted exactly once per process.
        let mut state = table.state.write();
        if *state == TableState::Running {
            return Ok(true);
        }
        if !tablets.iter().all(|t| t.has_reported_replica()) {
            return Ok(false);
        }
        self.sys.update_table(&table.to_row(TableState::Running))?;
        *state = TableState::Running;
        tracing::info!(table_id = %table.table_id, name = %table.name, "Table creation complete");
        Ok(true)
    }
}
