mod adapter;
mod connection;
mod wire;

pub use adapter::PgDriverAdapter;
pub use connection::PgConnection;
pub use wire::{BoundComposite, WireRow, primitive_type};

use connection::db_error;

use std::collections::HashSet;
use std::sync::Arc;

use deadpool_postgres::{Config, Pool, Runtime};
use fhir_composite::{
    Catalogue, CompositeError, ConnectionId, Result, SchemaLifecycleBinder, SchemaMetadata,
    TypeRegistry,
};
use tokio_postgres::NoTls;

/// Create a connection pool from a database URL
pub async fn create_pool(database_url: &str) -> std::result::Result<Pool, deadpool_postgres::CreatePoolError> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
}

/// Registry, driver adapter and lifecycle binder wired to one schema metadata object.
pub struct StructuredTypes {
    registry: Arc<TypeRegistry>,
    adapter: Arc<PgDriverAdapter>,
    binder: Arc<SchemaLifecycleBinder<PgDriverAdapter>>,
    metadata: SchemaMetadata<PgConnection>,
}

impl StructuredTypes {
    /// Define every catalogue entry and attach the lifecycle binder.
    pub fn new(catalogue: &Catalogue) -> Result<Self> {
        let registry = Arc::new(TypeRegistry::new());
        catalogue.define_all(&registry)?;

        let adapter = Arc::new(PgDriverAdapter::new(Arc::clone(&registry)));
        let binder = Arc::new(SchemaLifecycleBinder::new(
            Arc::clone(&registry),
            Arc::clone(&adapter),
        ));
        let mut metadata = SchemaMetadata::new();
        binder.attach(&mut metadata);

        Ok(Self {
            registry,
            adapter,
            binder,
            metadata,
        })
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &Arc<PgDriverAdapter> {
        &self.adapter
    }

    pub fn binder(&self) -> &Arc<SchemaLifecycleBinder<PgDriverAdapter>> {
        &self.binder
    }

    /// Check out a connection with every existing type registered on it.
    pub async fn connect(&self, pool: &Pool) -> Result<PgConnection> {
        let mut connection = self.checkout(pool).await?;
        self.binder.ensure_registered(&mut connection).await?;
        Ok(connection)
    }

    /// Run schema creation: CREATE TYPE for missing types, then driver registration.
    pub async fn create_schema(&self, pool: &Pool) -> Result<PgConnection> {
        let mut connection = self.checkout(pool).await?;
        self.metadata.create_all(&mut connection).await?;
        Ok(connection)
    }

    /// Run schema teardown: DROP TYPE for every present type, forgetting
    /// it on every connection.
    pub async fn drop_schema(&self, pool: &Pool) -> Result<()> {
        let mut connection = self.checkout(pool).await?;
        self.metadata.drop_all(&mut connection).await
    }

    async fn checkout(&self, pool: &Pool) -> Result<PgConnection> {
        let client = pool
            .get()
            .await
            .map_err(|e| CompositeError::DriverUnavailable(e.to_string()))?;
        let connection = PgConnection::attach(client).await?;
        if !self.adapter.knows_connection(connection.id()) {
            self.prune(&connection).await?;
            self.adapter.track_connection(connection.id());
        }
        Ok(connection)
    }

    /// A new physical connection means the pool may have discarded others:
    /// drop state held for backends that no longer exist.
    async fn prune(&self, connection: &PgConnection) -> Result<()> {
        let rows = connection
            .client()
            .query("SELECT pid FROM pg_stat_activity", &[])
            .await
            .map_err(db_error)?;
        let live: HashSet<ConnectionId> = rows
            .iter()
            .map(|row| ConnectionId(row.get::<_, i32>(0).unsigned_abs()))
            .collect();
        self.adapter.retain_connections(|id| live.contains(&id));
        self.binder.retain_connections(|id| live.contains(&id));
        tracing::debug!(live = live.len(), "Pruned state of closed connections");
        Ok(())
    }
}
