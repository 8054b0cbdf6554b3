use async_trait::async_trait;
use deadpool_postgres::Object;
use fhir_composite::{ClientEncoding, CompositeError, ConnectionId, Result, SchemaConnection};
use tokio_postgres::Client;

/// A pooled connection tagged with its backend PID and client encoding.
///
/// Driver-level type registration is scoped to the physical connection, so
/// the PID is what registrations are keyed by.
pub struct PgConnection {
    id: ConnectionId,
    encoding: ClientEncoding,
    client: Object,
}

impl PgConnection {
    pub async fn attach(client: Object) -> Result<Self> {
        if client.is_closed() {
            return Err(CompositeError::DriverUnavailable(
                "connection to PostgreSQL is closed".to_string(),
            ));
        }
        let row = client
            .query_one(
                "SELECT pg_backend_pid(), current_setting('client_encoding')",
                &[],
            )
            .await
            .map_err(db_error)?;
        let pid: i32 = row.get(0);
        let encoding: String = row.get(1);

        let id = ConnectionId(pid.unsigned_abs());
        let encoding = encoding.parse()?;
        tracing::debug!(connection = %id, %encoding, "Attached PostgreSQL connection");
        Ok(Self {
            id,
            encoding,
            client,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn encoding(&self) -> ClientEncoding {
        self.encoding
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[async_trait]
impl SchemaConnection for PgConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn type_exists(&mut self, type_name: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                   SELECT 1 FROM pg_type t
                   JOIN pg_namespace n ON n.oid = t.typnamespace
                   WHERE t.typname = $1 AND n.nspname = current_schema()
                 )",
                &[&type_name],
            )
            .await
            .map_err(db_error)?;
        Ok(row.get(0))
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(db_error)
    }
}

pub(crate) fn db_error(err: tokio_postgres::Error) -> CompositeError {
    if err.is_closed() {
        CompositeError::DriverUnavailable(err.to_string())
    } else {
        CompositeError::Database(err.to_string())
    }
}
