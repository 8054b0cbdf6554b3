//! Schema lifecycle hooks that keep structured-type DDL and driver
//! registration in step with schema creation and teardown.
//!
//! Per type and connection the binder moves through
//! `Undefined -> SchemaPresent -> DriverRegistered` on before-create and back
//! to `Undefined` on after-drop. Both transitions check the database catalog
//! first, so replaying them against a database that is already in the target
//! state emits no DDL.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::registry::{StructuredTypeDefinition, TypeRegistry};

/// Identity of one physical database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What the binder needs from a live connection.
#[async_trait]
pub trait SchemaConnection: Send {
    fn connection_id(&self) -> ConnectionId;

    /// Whether a structured type named `type_name` exists in the catalog.
    async fn type_exists(&mut self, type_name: &str) -> Result<bool>;

    async fn execute(&mut self, sql: &str) -> Result<()>;
}

/// Bridges definitions into a concrete driver's type system.
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    type Connection: SchemaConnection;

    /// Make the driver aware of `definition` on this connection.
    /// Registering an already registered pair must be a no-op.
    async fn register_with_connection(
        &self,
        connection: &mut Self::Connection,
        definition: &StructuredTypeDefinition,
    ) -> Result<()>;

    /// Forget `type_name` on every connection after it was dropped.
    /// `DROP TYPE` is database-wide, so no connection may keep the old type.
    fn unregister(&self, type_name: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaEvent {
    BeforeCreate,
    AfterDrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[async_trait]
pub trait SchemaListener<C: SchemaConnection>: Send + Sync {
    async fn on_event(&self, event: SchemaEvent, connection: &mut C) -> Result<()>;
}

struct Subscription<C: SchemaConnection> {
    handle: SubscriptionHandle,
    event: SchemaEvent,
    listener: Arc<dyn SchemaListener<C>>,
}

static NEXT_METADATA_ID: AtomicU64 = AtomicU64::new(1);

/// Schema metadata object that fires lifecycle events to its subscribers.
pub struct SchemaMetadata<C: SchemaConnection> {
    id: u64,
    next_handle: u64,
    subscriptions: Vec<Subscription<C>>,
}

impl<C: SchemaConnection> SchemaMetadata<C> {
    pub fn new() -> Self {
        Self {
            id: NEXT_METADATA_ID.fetch_add(1, Ordering::Relaxed),
            next_handle: 0,
            subscriptions: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subscribe(
        &mut self,
        event: SchemaEvent,
        listener: Arc<dyn SchemaListener<C>>,
    ) -> SubscriptionHandle {
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.subscriptions.push(Subscription {
            handle,
            event,
            listener,
        });
        handle
    }

    /// Returns false if the handle was not subscribed.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.handle != handle);
        self.subscriptions.len() != before
    }

    pub fn listener_count(&self, event: SchemaEvent) -> usize {
        self.subscriptions.iter().filter(|s| s.event == event).count()
    }

    /// Fire `BeforeCreate`.
    pub async fn create_all(&self, connection: &mut C) -> Result<()> {
        self.dispatch(SchemaEvent::BeforeCreate, connection).await
    }

    /// Fire `AfterDrop`.
    pub async fn drop_all(&self, connection: &mut C) -> Result<()> {
        self.dispatch(SchemaEvent::AfterDrop, connection).await
    }

    async fn dispatch(&self, event: SchemaEvent, connection: &mut C) -> Result<()> {
        let listeners: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|s| s.event == event)
            .map(|s| Arc::clone(&s.listener))
            .collect();
        for listener in listeners {
            listener.on_event(event, connection).await?;
        }
        Ok(())
    }
}

impl<C: SchemaConnection> Default for SchemaMetadata<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of one structured type on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    Undefined,
    SchemaPresent,
    DriverRegistered,
}

/// Emits CREATE/DROP TYPE for every registered definition and registers
/// created types with the driver.
pub struct SchemaLifecycleBinder<A: DriverAdapter> {
    registry: Arc<TypeRegistry>,
    adapter: Arc<A>,
    states: Mutex<HashMap<(ConnectionId, String), TypeState>>,
    attached: Mutex<HashMap<u64, [SubscriptionHandle; 2]>>,
}

impl<A: DriverAdapter + 'static> SchemaLifecycleBinder<A> {
    pub fn new(registry: Arc<TypeRegistry>, adapter: Arc<A>) -> Self {
        Self {
            registry,
            adapter,
            states: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Subscribe to before-create and after-drop on `metadata`.
    ///
    /// Returns false when already attached to that metadata object.
    pub fn attach(self: &Arc<Self>, metadata: &mut SchemaMetadata<A::Connection>) -> bool {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        if attached.contains_key(&metadata.id()) {
            debug!(metadata = metadata.id(), "Lifecycle binder already attached");
            return false;
        }
        let listener: Arc<dyn SchemaListener<A::Connection>> = self.clone();
        let create = metadata.subscribe(SchemaEvent::BeforeCreate, Arc::clone(&listener));
        let drop = metadata.subscribe(SchemaEvent::AfterDrop, listener);
        attached.insert(metadata.id(), [create, drop]);
        true
    }

    /// Remove this binder's subscriptions from `metadata`.
    pub fn detach(&self, metadata: &mut SchemaMetadata<A::Connection>) -> bool {
        let handles = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&metadata.id());
        match handles {
            Some(handles) => {
                for handle in handles {
                    metadata.unsubscribe(handle);
                }
                true
            }
            None => false,
        }
    }

    pub fn state(&self, connection: ConnectionId, type_name: &str) -> TypeState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(connection, type_name.to_string()))
            .copied()
            .unwrap_or(TypeState::Undefined)
    }

    fn set_state(&self, connection: ConnectionId, type_name: &str, state: TypeState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((connection, type_name.to_string()), state);
    }

    /// Reset `type_name` to `Undefined` on every connection.
    fn clear_type(&self, type_name: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, name), _| name != type_name);
    }

    /// Drop all state held for a connection that no longer exists.
    pub fn forget_connection(&self, connection: ConnectionId) {
        self.retain_connections(|id| id != connection);
    }

    /// Keep state only for connections `live` accepts.
    pub fn retain_connections(&self, live: impl Fn(ConnectionId) -> bool) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _), _| live(*id));
    }

    /// Create missing types, then register every type with the driver.
    #[instrument(skip_all, fields(connection = %connection.connection_id()))]
    pub async fn before_create(&self, connection: &mut A::Connection) -> Result<()> {
        let id = connection.connection_id();
        for definition in self.registry.all() {
            if connection.type_exists(definition.name()).await? {
                debug!(type_name = %definition.name(), "Structured type already present");
            } else {
                let sql = definition.create_type_sql();
                info!(type_name = %definition.name(), %sql, "Creating structured type");
                connection.execute(&sql).await?;
            }
            self.set_state(id, definition.name(), TypeState::SchemaPresent);

            self.adapter
                .register_with_connection(connection, &definition)
                .await?;
            self.set_state(id, definition.name(), TypeState::DriverRegistered);
        }
        Ok(())
    }

    /// Drop present types in reverse registration order.
    #[instrument(skip_all, fields(connection = %connection.connection_id()))]
    pub async fn after_drop(&self, connection: &mut A::Connection) -> Result<()> {
        for definition in self.registry.all().iter().rev() {
            if connection.type_exists(definition.name()).await? {
                let sql = definition.drop_type_sql();
                info!(type_name = %definition.name(), %sql, "Dropping structured type");
                connection.execute(&sql).await?;
            } else {
                debug!(type_name = %definition.name(), "Structured type already absent");
            }
            self.adapter.unregister(definition.name());
            self.clear_type(definition.name());
        }
        Ok(())
    }

    /// Register every type already present in the schema with a freshly
    /// opened connection, without emitting DDL.
    pub async fn ensure_registered(&self, connection: &mut A::Connection) -> Result<()> {
        let id = connection.connection_id();
        for definition in self.registry.all() {
            if !connection.type_exists(definition.name()).await? {
                debug!(type_name = %definition.name(), "Skipping registration, type not in schema");
                continue;
            }
            self.adapter
                .register_with_connection(connection, &definition)
                .await?;
            self.set_state(id, definition.name(), TypeState::DriverRegistered);
        }
        Ok(())
    }
}

#[async_trait]
impl<A: DriverAdapter + 'static> SchemaListener<A::Connection> for SchemaLifecycleBinder<A> {
    async fn on_event(&self, event: SchemaEvent, connection: &mut A::Connection) -> Result<()> {
        match event {
            SchemaEvent::BeforeCreate => self.before_create(connection).await,
            SchemaEvent::AfterDrop => self.after_drop(connection).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::error::CompositeError;
    use crate::field::{FieldSpec, StorageType};
    use crate::value::PrimitiveType;

    /// In-memory catalog that records every statement it executes.
    #[derive(Default)]
    struct FakeConnection {
        id: u32,
        types: HashSet<String>,
        executed: Vec<String>,
    }

    impl FakeConnection {
        fn new(id: u32) -> Self {
            Self {
                id,
                ..Default::default()
            }
        }

        fn count(&self, prefix: &str) -> usize {
            self.executed.iter().filter(|s| s.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl SchemaConnection for FakeConnection {
        fn connection_id(&self) -> ConnectionId {
            ConnectionId(self.id)
        }

        async fn type_exists(&mut self, type_name: &str) -> Result<bool> {
            Ok(self.types.contains(type_name))
        }

        async fn execute(&mut self, sql: &str) -> Result<()> {
            self.executed.push(sql.to_string());
            let name = |prefix: &str| {
                sql.strip_prefix(prefix)
                    .and_then(|rest| rest.split_whitespace().next())
                    .map(|n| n.trim_matches('"').to_string())
            };
            if let Some(created) = name("CREATE TYPE ") {
                self.types.insert(created);
            } else if let Some(dropped) = name("DROP TYPE ") {
                self.types.remove(&dropped);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAdapter {
        available: bool,
        registered: Mutex<HashSet<(ConnectionId, String)>>,
        calls: Mutex<usize>,
    }

    impl RecordingAdapter {
        fn available() -> Self {
            Self {
                available: true,
                ..Default::default()
            }
        }

        fn is_registered(&self, id: ConnectionId, name: &str) -> bool {
            self.registered.lock().unwrap().contains(&(id, name.to_string()))
        }
    }

    #[async_trait]
    impl DriverAdapter for RecordingAdapter {
        type Connection = FakeConnection;

        async fn register_with_connection(
            &self,
            connection: &mut FakeConnection,
            definition: &StructuredTypeDefinition,
        ) -> Result<()> {
            if !self.available {
                return Err(CompositeError::DriverUnavailable("no driver".into()));
            }
            *self.calls.lock().unwrap() += 1;
            self.registered
                .lock()
                .unwrap()
                .insert((connection.connection_id(), definition.name().to_string()));
            Ok(())
        }

        fn unregister(&self, type_name: &str) {
            self.registered
                .lock()
                .unwrap()
                .retain(|(_, name)| name != type_name);
        }
    }

    fn registry() -> Arc<TypeRegistry> {
        let registry = TypeRegistry::new();
        registry
            .define(
                "period",
                vec![
                    FieldSpec::new("start", PrimitiveType::Timestamp),
                    FieldSpec::new("end", PrimitiveType::Timestamp),
                ],
            )
            .unwrap();
        registry
            .define(
                "money_type",
                vec![
                    FieldSpec::new("name", PrimitiveType::Text),
                    FieldSpec::new("amount", PrimitiveType::Integer),
                    FieldSpec::new("valid", StorageType::composite("period")),
                ],
            )
            .unwrap();
        Arc::new(registry)
    }

    fn binder(adapter: RecordingAdapter) -> Arc<SchemaLifecycleBinder<RecordingAdapter>> {
        Arc::new(SchemaLifecycleBinder::new(registry(), Arc::new(adapter)))
    }

    #[tokio::test]
    async fn before_create_twice_emits_one_create_per_type() {
        let binder = binder(RecordingAdapter::available());
        let mut metadata = SchemaMetadata::new();
        binder.attach(&mut metadata);
        let mut conn = FakeConnection::new(7);

        metadata.create_all(&mut conn).await.unwrap();
        metadata.create_all(&mut conn).await.unwrap();

        assert_eq!(conn.count("CREATE TYPE period"), 1);
        assert_eq!(conn.count("CREATE TYPE money_type"), 1);
        assert_eq!(
            conn.executed[0],
            "CREATE TYPE period AS (start timestamp with time zone, \"end\" timestamp with time zone)"
        );
        assert_eq!(binder.state(ConnectionId(7), "money_type"), TypeState::DriverRegistered);
        assert!(binder.adapter().is_registered(ConnectionId(7), "period"));
    }

    #[tokio::test]
    async fn attaching_twice_does_not_duplicate_listeners() {
        let binder = binder(RecordingAdapter::available());
        let mut metadata = SchemaMetadata::new();
        assert!(binder.attach(&mut metadata));
        assert!(!binder.attach(&mut metadata));
        assert_eq!(metadata.listener_count(SchemaEvent::BeforeCreate), 1);
        assert_eq!(metadata.listener_count(SchemaEvent::AfterDrop), 1);

        let mut conn = FakeConnection::new(1);
        metadata.create_all(&mut conn).await.unwrap();
        assert_eq!(conn.count("CREATE TYPE"), 2);
        assert_eq!(*binder.adapter().calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn drop_runs_in_reverse_and_skips_missing_types() {
        let binder = binder(RecordingAdapter::available());
        let mut metadata = SchemaMetadata::new();
        binder.attach(&mut metadata);
        let mut conn = FakeConnection::new(2);

        metadata.drop_all(&mut conn).await.unwrap();
        assert!(conn.executed.is_empty());

        metadata.create_all(&mut conn).await.unwrap();
        metadata.drop_all(&mut conn).await.unwrap();
        let drops: Vec<_> = conn
            .executed
            .iter()
            .filter(|s| s.starts_with("DROP"))
            .cloned()
            .collect();
        assert_eq!(drops, vec!["DROP TYPE money_type", "DROP TYPE period"]);
        assert_eq!(binder.state(ConnectionId(2), "period"), TypeState::Undefined);
        assert!(!binder.adapter().is_registered(ConnectionId(2), "period"));
    }

    #[tokio::test]
    async fn detach_stops_ddl_emission() {
        let binder = binder(RecordingAdapter::available());
        let mut metadata = SchemaMetadata::new();
        binder.attach(&mut metadata);
        assert!(binder.detach(&mut metadata));
        assert!(!binder.detach(&mut metadata));

        let mut conn = FakeConnection::new(3);
        metadata.create_all(&mut conn).await.unwrap();
        assert!(conn.executed.is_empty());
        assert_eq!(metadata.listener_count(SchemaEvent::BeforeCreate), 0);
    }

    #[tokio::test]
    async fn registration_is_per_connection() {
        let binder = binder(RecordingAdapter::available());
        let mut first = FakeConnection::new(10);
        binder.before_create(&mut first).await.unwrap();

        let mut second = FakeConnection::new(11);
        second.types = first.types.clone();
        assert_eq!(binder.state(ConnectionId(11), "period"), TypeState::Undefined);
        binder.ensure_registered(&mut second).await.unwrap();

        assert!(second.executed.is_empty());
        assert_eq!(binder.state(ConnectionId(11), "period"), TypeState::DriverRegistered);
        assert!(binder.adapter().is_registered(ConnectionId(11), "money_type"));
    }

    #[tokio::test]
    async fn drop_on_one_connection_resets_every_connection() {
        let binder = binder(RecordingAdapter::available());
        let mut metadata = SchemaMetadata::new();
        binder.attach(&mut metadata);
        let mut first = FakeConnection::new(20);
        metadata.create_all(&mut first).await.unwrap();
        let mut second = FakeConnection::new(21);
        second.types = first.types.clone();
        binder.ensure_registered(&mut second).await.unwrap();
        assert_eq!(binder.state(ConnectionId(21), "period"), TypeState::DriverRegistered);

        metadata.drop_all(&mut first).await.unwrap();
        second.types.clear();
        for id in [ConnectionId(20), ConnectionId(21)] {
            for name in ["period", "money_type"] {
                assert_eq!(binder.state(id, name), TypeState::Undefined);
                assert!(!binder.adapter().is_registered(id, name));
            }
        }

        // Recreated types are registered afresh on the other connection
        metadata.create_all(&mut first).await.unwrap();
        second.types = first.types.clone();
        let calls = *binder.adapter().calls.lock().unwrap();
        binder.ensure_registered(&mut second).await.unwrap();
        assert_eq!(*binder.adapter().calls.lock().unwrap(), calls + 2);
        assert_eq!(binder.state(ConnectionId(21), "money_type"), TypeState::DriverRegistered);
    }

    #[tokio::test]
    async fn forgotten_connections_lose_their_state() {
        let binder = binder(RecordingAdapter::available());
        let mut first = FakeConnection::new(30);
        let mut second = FakeConnection::new(31);
        binder.before_create(&mut first).await.unwrap();
        second.types = first.types.clone();
        binder.ensure_registered(&mut second).await.unwrap();

        binder.forget_connection(ConnectionId(30));
        assert_eq!(binder.state(ConnectionId(30), "period"), TypeState::Undefined);
        assert_eq!(binder.state(ConnectionId(31), "period"), TypeState::DriverRegistered);

        binder.retain_connections(|_| false);
        assert_eq!(binder.state(ConnectionId(31), "period"), TypeState::Undefined);
    }

    #[tokio::test]
    async fn missing_driver_surfaces_after_schema_is_present() {
        let binder = binder(RecordingAdapter::default());
        let mut conn = FakeConnection::new(4);
        let err = binder.before_create(&mut conn).await.unwrap_err();
        assert!(matches!(err, CompositeError::DriverUnavailable(_)));
        assert_eq!(binder.state(ConnectionId(4), "period"), TypeState::SchemaPresent);
    }

    #[tokio::test]
    async fn unsubscribe_reports_unknown_handles() {
        let mut metadata: SchemaMetadata<FakeConnection> = SchemaMetadata::new();
        let binder = binder(RecordingAdapter::available());
        let handle = metadata.subscribe(SchemaEvent::BeforeCreate, binder);
        assert!(metadata.unsubscribe(handle));
        assert!(!metadata.unsubscribe(handle));
    }
}
