//! tokio-postgres implementation of the structured type driver adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use fhir_composite::{
    CompositeError, ConnectionId, DriverAdapter, Result, StorageType, StructuredTypeCodec,
    StructuredTypeDefinition, StructuredValue, TypeRegistry, WireLiteral, parse_wire_literal,
    serialize_for_wire,
};
use tokio_postgres::Row;
use tokio_postgres::types::{Field, Kind, Type};
use tracing::{debug, info, instrument};

use super::connection::{PgConnection, db_error};
use super::wire::{BoundComposite, WireRow, primitive_type};

/// Registers structured types with live PostgreSQL connections and converts
/// values at the driver boundary.
///
/// Registration resolves the type in the catalog, checks its attributes
/// against the definition and caches the resulting driver `Type` per
/// connection.
pub struct PgDriverAdapter {
    registry: Arc<TypeRegistry>,
    registered: Mutex<HashMap<ConnectionId, HashMap<String, Type>>>,
}

impl PgDriverAdapter {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            registered: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Driver type registered for `type_name` on `connection`, usable with
    /// `prepare_typed`.
    pub fn registered_type(&self, connection: ConnectionId, type_name: &str) -> Option<Type> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .and_then(|types| types.get(type_name))
            .cloned()
    }

    pub fn is_registered(&self, connection: ConnectionId, type_name: &str) -> bool {
        self.registered_type(connection, type_name).is_some()
    }

    /// Whether this physical connection has been seen by the adapter.
    pub fn knows_connection(&self, connection: ConnectionId) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection)
    }

    /// Record a connection with nothing registered on it yet.
    pub(crate) fn track_connection(&self, connection: ConnectionId) {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(connection)
            .or_default();
    }

    /// Drop every registration held for a connection that went away.
    pub fn forget_connection(&self, connection: ConnectionId) {
        self.retain_connections(|id| id != connection);
    }

    /// Keep registrations only for connections `live` accepts.
    pub fn retain_connections(&self, live: impl Fn(ConnectionId) -> bool) {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| live(*id));
    }

    /// Encode `value` for binding as a query parameter on `connection`.
    pub fn bind(&self, connection: &PgConnection, value: &StructuredValue) -> Result<BoundComposite> {
        if !self.is_registered(connection.id(), value.type_name()) {
            return Err(CompositeError::NotRegistered(value.type_name().to_string()));
        }
        let definition = self.definition(value.type_name())?;
        let row = StructuredTypeCodec::new(&self.registry).encode_row(&definition, value)?;
        Ok(BoundComposite::new(definition.name(), row))
    }

    /// Decode a composite column. SQL NULL gives `None`.
    pub fn decode(&self, row: &Row, index: usize) -> Result<Option<StructuredValue>> {
        let wire: Option<WireRow> = row.try_get(index).map_err(db_error)?;
        let Some(wire) = wire else {
            return Ok(None);
        };
        let definition = self.definition(&wire.type_name)?;
        StructuredTypeCodec::new(&self.registry).decode(&definition, Some(wire.fields), &wire.type_name)
    }

    /// Decode a composite column that was selected as text (`col::text`).
    pub fn decode_text(&self, type_name: &str, text: Option<&str>) -> Result<Option<StructuredValue>> {
        let Some(text) = text else {
            return Ok(None);
        };
        let definition = self.definition(type_name)?;
        parse_wire_literal(&self.registry, &definition, text).map(Some)
    }

    /// Render `value` as a composite literal in the connection's encoding.
    pub fn serialize_for_wire(
        &self,
        connection: &PgConnection,
        value: &StructuredValue,
    ) -> Result<WireLiteral> {
        let definition = self.definition(value.type_name())?;
        serialize_for_wire(&self.registry, &definition, value, connection.encoding())
    }

    fn definition(&self, type_name: &str) -> Result<Arc<StructuredTypeDefinition>> {
        self.registry
            .lookup(type_name)
            .ok_or_else(|| CompositeError::UnknownType(type_name.to_string()))
    }

    /// Build the driver type for `definition` from the live catalog,
    /// rejecting layouts that drifted from the definition.
    async fn resolve(
        &self,
        connection: &PgConnection,
        definition: &StructuredTypeDefinition,
    ) -> Result<Type> {
        let client = connection.client();
        let row = client
            .query_opt(
                "SELECT t.oid, t.typrelid, n.nspname
                   FROM pg_type t
                   JOIN pg_namespace n ON n.oid = t.typnamespace
                  WHERE t.typname = $1 AND t.typtype = 'c' AND n.nspname = current_schema()",
                &[&definition.name()],
            )
            .await
            .map_err(db_error)?
            .ok_or_else(|| CompositeError::UnknownType(definition.name().to_string()))?;
        let oid: u32 = row.get(0);
        let relid: u32 = row.get(1);
        let schema: String = row.get(2);

        let attributes = client
            .query(
                "SELECT attname, atttypid FROM pg_attribute
                  WHERE attrelid = $1 AND attnum > 0 AND NOT attisdropped
                  ORDER BY attnum",
                &[&relid],
            )
            .await
            .map_err(db_error)?;

        if attributes.len() != definition.fields().len() {
            return Err(CompositeError::LayoutMismatch(format!(
                "'{}' has {} attributes in the database, definition has {}",
                definition.name(),
                attributes.len(),
                definition.fields().len()
            )));
        }

        let mut fields = Vec::with_capacity(attributes.len());
        for (spec, attribute) in definition.fields().iter().zip(&attributes) {
            let name: String = attribute.get(0);
            let type_oid: u32 = attribute.get(1);
            let field_type = match spec.storage() {
                StorageType::Primitive(kind) => primitive_type(*kind),
                StorageType::Composite(nested) => self
                    .registered_type(connection.id(), nested)
                    .ok_or_else(|| CompositeError::NotRegistered(nested.clone()))?,
            };
            if name != spec.name() || type_oid != field_type.oid() {
                return Err(CompositeError::LayoutMismatch(format!(
                    "'{}' attribute {} ({}) does not match field {} ({})",
                    definition.name(),
                    name,
                    type_oid,
                    spec.name(),
                    field_type.name()
                )));
            }
            fields.push(Field::new(name, field_type));
        }

        Ok(Type::new(
            definition.name().to_string(),
            oid,
            Kind::Composite(fields),
            schema,
        ))
    }
}

#[async_trait]
impl DriverAdapter for PgDriverAdapter {
    type Connection = PgConnection;

    #[instrument(skip_all, fields(connection = %connection.id(), type_name = %definition.name()))]
    async fn register_with_connection(
        &self,
        connection: &mut PgConnection,
        definition: &StructuredTypeDefinition,
    ) -> Result<()> {
        if connection.is_closed() {
            return Err(CompositeError::DriverUnavailable(
                "connection to PostgreSQL is closed".to_string(),
            ));
        }
        if self.is_registered(connection.id(), definition.name()) {
            debug!("Structured type already registered with connection");
            return Ok(());
        }

        let ty = self.resolve(connection, definition).await?;
        info!(oid = ty.oid(), "Registered structured type with driver");
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(connection.id())
            .or_default()
            .insert(definition.name().to_string(), ty);
        Ok(())
    }

    fn unregister(&self, type_name: &str) {
        let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        for types in registered.values_mut() {
            types.remove(type_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(adapter: &PgDriverAdapter, connection: u32, type_name: &str) {
        adapter
            .registered
            .lock()
            .unwrap()
            .entry(ConnectionId(connection))
            .or_default()
            .insert(type_name.to_string(), Type::TEXT);
    }

    #[test]
    fn unregister_clears_the_type_on_every_connection() {
        let adapter = PgDriverAdapter::new(Arc::new(TypeRegistry::new()));
        cache(&adapter, 1, "period");
        cache(&adapter, 2, "period");
        cache(&adapter, 2, "coding");

        adapter.unregister("period");

        assert!(!adapter.is_registered(ConnectionId(1), "period"));
        assert!(!adapter.is_registered(ConnectionId(2), "period"));
        assert!(adapter.is_registered(ConnectionId(2), "coding"));
    }

    #[test]
    fn dead_connections_are_pruned() {
        let adapter = PgDriverAdapter::new(Arc::new(TypeRegistry::new()));
        cache(&adapter, 1, "period");
        cache(&adapter, 2, "period");
        adapter.track_connection(ConnectionId(3));
        assert!(adapter.knows_connection(ConnectionId(3)));

        adapter.retain_connections(|id| id == ConnectionId(2));
        assert!(!adapter.knows_connection(ConnectionId(1)));
        assert!(!adapter.knows_connection(ConnectionId(3)));
        assert!(adapter.is_registered(ConnectionId(2), "period"));

        adapter.forget_connection(ConnectionId(2));
        assert!(!adapter.knows_connection(ConnectionId(2)));
    }
}
