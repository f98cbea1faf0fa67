//! Table-management handlers.

use quarry_types::{Result, TabletId, TabletReplica};
use quarry_wire::admin::{
    CreateTableRequest, CreateTableResponse, GetTableLocationsRequest, GetTableLocationsResponse,
    GetTableSchemaRequest, GetTableSchemaResponse, GetTabletLocationsRequest,
    GetTabletLocationsResponse, IsCreateTableDoneRequest, IsCreateTableDoneResponse,
    ReplicaLocation, TabletLocations,
};

use super::MasterService;

impl MasterService {
    /// Creates a table and returns as soon as its catalog rows are
    /// durable; tablet provisioning continues asynchronously.
    ///
    /// # Errors
    ///
    /// Gate failures abort the call;
    /// [`quarry_types::MasterError::AlreadyExists`] if the name is taken,
    /// [`quarry_types::MasterError::InvalidSchema`] for a zero replication
    /// factor, [`quarry_types::MasterError::Storage`] on persistence
    /// failure.
    pub async fn create_table(&self, req: CreateTableRequest) -> Result<CreateTableResponse> {
        let lease = self.gate.acquire()?;
        let table_id =
            self.catalog().create_table(&lease, &req.name, req.schema, req.replication_factor)?;
        Ok(CreateTableResponse { table_id })
    }

    /// Polls whether an asynchronous table creation has completed.
    ///
    /// # Errors
    ///
    /// Gate failures abort the call;
    /// [`quarry_types::MasterError::NotFound`] if the table never existed.
    pub async fn is_create_table_done(
        &self,
        req: IsCreateTableDoneRequest,
    ) -> Result<IsCreateTableDoneResponse> {
        let lease = self.gate.acquire()?;
        let done = self.catalog().is_create_table_done(&lease, &req.name)?;
        Ok(IsCreateTableDoneResponse { done })
    }

    /// Fetches a table's schema and creation-done flag.
    ///
    /// # Errors
    ///
    /// Gate failures abort the call;
    /// [`quarry_types::MasterError::NotFound`] if the table never existed.
    pub async fn get_table_schema(
        &self,
        req: GetTableSchemaRequest,
    ) -> Result<GetTableSchemaResponse> {
        let lease = self.gate.acquire()?;
        let (table_id, schema, create_table_done) =
            self.catalog().get_table_schema(&lease, &req.name)?;
        Ok(GetTableSchemaResponse { table_id, schema, create_table_done })
    }

    /// Fetches the best-known replica locations of a tablet.
    ///
    /// Replica entries carry the hosting server's advertised endpoints
    /// when it has registered with this master process, and no endpoints
    /// otherwise (e.g. before re-registration after a master restart).
    ///
    /// # Errors
    ///
    /// Gate failures abort the call;
    /// [`quarry_types::MasterError::NotFound`] for an unknown tablet.
    pub async fn get_tablet_locations(
        &self,
        req: GetTabletLocationsRequest,
    ) -> Result<GetTabletLocationsResponse> {
        let lease = self.gate.acquire()?;
        let replicas = self.catalog().get_tablet_locations(&lease, req.tablet_id)?;
        Ok(GetTabletLocationsResponse { locations: self.locate(req.tablet_id, replicas) })
    }

    /// Fetches the locations of every tablet of a table.
    ///
    /// # Errors
    ///
    /// Gate failures abort the call;
    /// [`quarry_types::MasterError::NotFound`] if the table never existed.
    pub async fn get_table_locations(
        &self,
        req: GetTableLocationsRequest,
    ) -> Result<GetTableLocationsResponse> {
        let lease = self.gate.acquire()?;
        let tablets = self.catalog().get_table_locations(&lease, &req.name)?;
        let tablet_locations = tablets
            .into_iter()
            .map(|(tablet_id, replicas)| self.locate(tablet_id, replicas))
            .collect();
        Ok(GetTableLocationsResponse { tablet_locations })
    }

    /// Joins replica state with registry endpoints for one tablet.
    fn locate(&self, tablet_id: TabletId, replicas: Vec<TabletReplica>) -> TabletLocations {
        let replicas = replicas
            .into_iter()
            .map(|replica| {
                let rpc_endpoints = self
                    .registry()
                    .get(replica.ts_id)
                    .map(|d| d.registration().rpc_endpoints)
                    .unwrap_or_default();
                ReplicaLocation { ts_id: replica.ts_id, role: replica.role, rpc_endpoints }
            })
            .collect();
        TabletLocations { tablet_id, replicas }
    }
}
