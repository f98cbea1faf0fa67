//! Table-management request/response shapes.

use serde::{Deserialize, Serialize};

use quarry_types::{HostPort, ReplicaRole, Schema, TableId, TabletId, TsId};

/// Request to create a new table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTableRequest {
    /// Table name, unique across the cluster.
    pub name: String,
    /// Validated column schema.
    pub schema: Schema,
    /// Desired number of replicas per tablet.
    pub replication_factor: u32,
}

/// Response to [`CreateTableRequest`].
///
/// Creation is asynchronous: the response returns as soon as the catalog
/// rows are durable. Poll [`IsCreateTableDoneRequest`] for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTableResponse {
    /// Permanent id of the new table.
    pub table_id: TableId,
}

/// Poll for completion of an asynchronous table creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsCreateTableDoneRequest {
    /// Name of the table being created.
    pub name: String,
}

/// Response to [`IsCreateTableDoneRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsCreateTableDoneResponse {
    /// True once every tablet of the table has a reported replica.
    pub done: bool,
}

/// Fetch a table's schema by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTableSchemaRequest {
    /// Table name.
    pub name: String,
}

/// Response to [`GetTableSchemaRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTableSchemaResponse {
    /// Permanent id of the table.
    pub table_id: TableId,
    /// The table's schema.
    pub schema: Schema,
    /// Whether creation has completed.
    pub create_table_done: bool,
}

/// Fetch the replica locations of a tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTabletLocationsRequest {
    /// Tablet id.
    pub tablet_id: TabletId,
}

/// One replica's location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLocation {
    /// Hosting server.
    pub ts_id: TsId,
    /// Last-known role of the replica.
    pub role: ReplicaRole,
    /// The hosting server's advertised RPC endpoints. Empty if the server
    /// has not re-registered since the master last restarted.
    pub rpc_endpoints: Vec<HostPort>,
}

/// The best-known replica set of one tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletLocations {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Known replicas. Empty until a server first reports the tablet.
    pub replicas: Vec<ReplicaLocation>,
}

/// Response to [`GetTabletLocationsRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTabletLocationsResponse {
    /// Locations of the requested tablet.
    pub locations: TabletLocations,
}

/// Fetch the locations of every tablet of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTableLocationsRequest {
    /// Table name.
    pub name: String,
}

/// Response to [`GetTableLocationsRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTableLocationsResponse {
    /// Per-tablet locations, in tablet-creation order.
    pub tablet_locations: Vec<TabletLocations>,
}
