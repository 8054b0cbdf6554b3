//! SQL identifier handling and CREATE/DROP TYPE generation

use crate::error::{CompositeError, Result};
use crate::field::StorageType;
use crate::registry::StructuredTypeDefinition;

/// PostgreSQL limits identifiers to NAMEDATALEN - 1 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Keywords that cannot appear unquoted as a type or attribute name.
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "system_user", "table",
    "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

/// Type names PostgreSQL resolves to `pg_catalog` (searched before the
/// current schema) or parses as a type keyword, so a composite of that name
/// could never be referenced from another composite.
const BUILTIN_TYPE_NAMES: &[&str] = &[
    // pg_catalog base and pseudo types
    "aclitem", "any", "anyarray", "anyelement", "anyenum", "anyrange", "bit", "bool",
    "box", "bpchar", "bytea", "char", "cid", "cidr", "circle", "cstring", "date",
    "float4", "float8", "gtsvector", "inet", "int2", "int2vector", "int4", "int8",
    "interval", "json", "jsonb", "jsonpath", "line", "lseg", "macaddr", "macaddr8",
    "money", "name", "numeric", "oid", "oidvector", "path", "pg_lsn", "point",
    "polygon", "record", "refcursor", "regclass", "regconfig", "regdictionary",
    "regnamespace", "regoper", "regoperator", "regproc", "regprocedure", "regrole",
    "regtype", "text", "tid", "time", "timestamp", "timestamptz", "timetz", "trigger",
    "tsquery", "tsvector", "txid_snapshot", "uuid", "varbit", "varchar", "void", "xid",
    "xid8", "xml", "int4range", "int8range", "numrange", "tsrange", "tstzrange",
    "daterange",
    // keywords that cannot name a user type
    "between", "bigint", "boolean", "character", "coalesce", "dec", "decimal", "double",
    "exists", "extract", "float", "greatest", "grouping", "inout", "int", "integer",
    "least", "national", "nchar", "none", "normalize", "nullif", "out", "overlay",
    "position", "precision", "real", "row", "setof", "smallint", "substring", "treat",
    "trim", "values", "xmlattributes", "xmlconcat", "xmlelement", "xmlexists",
    "xmlforest", "xmlnamespaces", "xmlparse", "xmlpi", "xmlroot", "xmlserialize",
    "xmltable",
];

/// Check that `name` can be used as a type or field name.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CompositeError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Check that `name` can be created as a composite type and referenced from
/// other composites. Array type names (`_int4`) are rejected with their element.
pub fn validate_type_name(name: &str) -> Result<()> {
    validate_identifier(name)?;
    let element = name.strip_prefix('_').unwrap_or(name);
    if BUILTIN_TYPE_NAMES.contains(&element) {
        return Err(CompositeError::InvalidIdentifier(format!(
            "{name} (shadowed by a built-in PostgreSQL type)"
        )));
    }
    Ok(())
}

/// Quote an identifier only when PostgreSQL would otherwise fold or reject it.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !RESERVED_KEYWORDS.contains(&name);
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn sql_type(storage: &StorageType) -> String {
    match storage {
        StorageType::Primitive(p) => p.sql_type().to_string(),
        StorageType::Composite(name) => quote_ident(name),
    }
}

/// `CREATE TYPE name AS (field type, ...)` in definition order.
pub fn create_type_sql(definition: &StructuredTypeDefinition) -> String {
    let columns = definition
        .fields()
        .iter()
        .map(|field| format!("{} {}", quote_ident(field.name()), sql_type(field.storage())))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TYPE {} AS ({})",
        quote_ident(definition.name()),
        columns
    )
}

pub fn drop_type_sql(type_name: &str) -> String {
    format!("DROP TYPE {}", quote_ident(type_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_reserved_and_mixed_case_names() {
        assert_eq!(quote_ident("amount"), "amount");
        assert_eq!(quote_ident("end"), "\"end\"");
        assert_eq!(quote_ident("HumanName"), "\"HumanName\"");
        assert_eq!(quote_ident("postal_code"), "postal_code");
    }

    #[test]
    fn rejects_unusable_identifiers() {
        assert!(validate_identifier("money_type").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        for bad in ["", "1abc", "has space", "semi;colon", "quo\"te"] {
            assert!(validate_identifier(bad).is_err(), "accepted {bad:?}");
        }
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn type_names_shadowed_by_builtins_are_rejected() {
        for ok in ["period", "money_amount", "human_name", "slot", "Time"] {
            assert!(validate_type_name(ok).is_ok(), "rejected {ok:?}");
        }
        for shadowed in ["time", "values", "money", "date", "name", "point", "_int4", "numeric"] {
            assert!(
                matches!(
                    validate_type_name(shadowed),
                    Err(CompositeError::InvalidIdentifier(_))
                ),
                "accepted {shadowed:?}"
            );
        }
        // Field names may still use them
        assert!(validate_identifier("time").is_ok());
    }

    #[test]
    fn drop_statement_quotes_when_needed() {
        assert_eq!(drop_type_sql("money_type"), "DROP TYPE money_type");
        assert_eq!(drop_type_sql("Period"), "DROP TYPE \"Period\"");
    }
}
