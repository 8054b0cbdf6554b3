//! Structured type definitions and the registry that owns them

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::ddl;
use crate::error::{CompositeError, Result};
use crate::field::FieldSpec;

/// Named, ordered field layout of a structured type.
///
/// Field order is the wire contract: it fixes both the column order of the
/// generated `CREATE TYPE` and tuple positions on encode/decode.
#[derive(Debug, PartialEq, Eq)]
pub struct StructuredTypeDefinition {
    name: String,
    fields: Vec<FieldSpec>,
    positions: HashMap<String, usize>,
}

impl StructuredTypeDefinition {
    fn new(name: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        ddl::validate_type_name(name)?;
        let mut positions = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            ddl::validate_identifier(field.name())?;
            if positions.insert(field.name().to_string(), index).is_some() {
                return Err(CompositeError::DuplicateField {
                    type_name: name.to_string(),
                    field: field.name().to_string(),
                });
            }
        }
        Ok(Self {
            name: name.to_string(),
            fields,
            positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Tuple position of a field.
    pub fn position(&self, field: &str) -> Option<usize> {
        self.positions.get(field).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.position(name).map(|index| &self.fields[index])
    }

    pub fn create_type_sql(&self) -> String {
        ddl::create_type_sql(self)
    }

    pub fn drop_type_sql(&self) -> String {
        ddl::drop_type_sql(&self.name)
    }
}

#[derive(Default)]
struct RegistryInner {
    ordered: Vec<Arc<StructuredTypeDefinition>>,
    by_name: HashMap<String, Arc<StructuredTypeDefinition>>,
}

/// Owns every structured type definition, keyed by name.
///
/// Shared read-mostly; `define` takes the write lock so concurrent callers
/// registering the same name cannot both insert.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with `fields`, or return the existing definition.
    ///
    /// The first definition wins: a later call with a different layout gets
    /// the original back and a warning is logged. Referenced structured types
    /// must already be registered.
    pub fn define(
        &self,
        name: &str,
        fields: Vec<FieldSpec>,
    ) -> Result<Arc<StructuredTypeDefinition>> {
        let candidate = StructuredTypeDefinition::new(name, fields)?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.by_name.get(name) {
            if existing.fields != candidate.fields {
                tracing::warn!(
                    type_name = %name,
                    "Ignoring redefinition of structured type with a different layout"
                );
            } else {
                tracing::debug!(type_name = %name, "Structured type already defined");
            }
            return Ok(Arc::clone(existing));
        }

        for field in candidate.fields() {
            if let Some(referenced) = field.storage().referenced_type() {
                if !inner.by_name.contains_key(referenced) {
                    return Err(CompositeError::UnknownType(referenced.to_string()));
                }
            }
        }

        let definition = Arc::new(candidate);
        inner.ordered.push(Arc::clone(&definition));
        inner
            .by_name
            .insert(name.to_string(), Arc::clone(&definition));
        tracing::debug!(
            type_name = %name,
            fields = definition.fields().len(),
            "Defined structured type"
        );
        Ok(definition)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<StructuredTypeDefinition>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_name.get(name).cloned()
    }

    /// Every definition in registration order (a valid creation order).
    pub fn all(&self) -> Vec<Arc<StructuredTypeDefinition>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
