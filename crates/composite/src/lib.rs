//! fhir-composite: structured FHIR value types as PostgreSQL composite types
//!
//! Maps nested FHIR datatypes (an `Address` inside a `Patient`, a `Period`
//! inside an `Identifier`) onto named composite column types: a registry of
//! type layouts, a positional codec, composite literal rendering, DDL, and
//! lifecycle hooks that create, register and drop the types alongside the
//! application schema. The driver side lives behind [`DriverAdapter`].

pub mod catalogue;
pub mod codec;
pub mod ddl;
pub mod error;
pub mod field;
pub mod lifecycle;
pub mod literal;
pub mod registry;
pub mod value;

pub use catalogue::{Catalogue, CatalogueEntry, CatalogueField};
pub use codec::StructuredTypeCodec;
pub use error::{CompositeError, Result};
pub use field::{FieldSpec, FieldTransform, StorageType};
pub use lifecycle::{
    ConnectionId, DriverAdapter, SchemaConnection, SchemaEvent, SchemaLifecycleBinder,
    SchemaListener, SchemaMetadata, SubscriptionHandle, TypeState,
};
pub use literal::{ClientEncoding, WireLiteral, parse_wire_literal, serialize_for_wire};
pub use registry::{StructuredTypeDefinition, TypeRegistry};
pub use value::{Decimal, FieldValue, Primitive, PrimitiveType, StructuredValue, WireValue};
