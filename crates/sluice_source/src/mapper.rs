//! Native type tag to [`NormalizedType`] mapping.
//!
//! Total and pure: every input maps to some type, unrecognized tags fall back
//! to [`NormalizedType::Unknown`].

use crate::types::{ColumnType, NormalizedType};

/// Map a native type tag and its nullability to a [`ColumnType`].
///
/// Matching ignores case, surrounding whitespace, type parameters
/// (`varchar(255)`, `numeric(10,2)`) and trailing `NULL`/`NOT NULL` markers.
pub fn map(native_type: &str, nullable: bool) -> ColumnType {
    ColumnType::new(normalize_tag(native_type), nullable)
}

/// Map a native type tag, ignoring nullability.
pub fn normalize_tag(native_type: &str) -> NormalizedType {
    let tag = native_type.trim().to_ascii_lowercase();
    let tag = strip_nullability(&tag);

    if let Some(item) = array_item(tag) {
        return NormalizedType::Array(Box::new(item));
    }

    scalar(&canonical(tag))
}

fn strip_nullability(tag: &str) -> &str {
    let tag = tag.trim();
    if let Some(rest) = tag.strip_suffix(" not null") {
        return rest.trim_end();
    }
    if let Some(rest) = tag.strip_suffix(" null") {
        return rest.trim_end();
    }
    tag
}

/// Element type of an array tag, or `None` when the tag is not an array.
fn array_item(tag: &str) -> Option<NormalizedType> {
    if tag == "array" {
        return Some(NormalizedType::Unknown);
    }
    if let Some(inner) = tag
        .strip_prefix("array(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return Some(normalize_tag(inner));
    }
    if let Some(inner) = tag.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
        return Some(normalize_tag(inner));
    }
    if let Some(inner) = tag.strip_suffix("[]") {
        return Some(normalize_tag(inner));
    }
    // PostgreSQL names array types after their element with a leading underscore
    if let Some(inner) = tag.strip_prefix('_') {
        if !inner.is_empty() {
            return Some(normalize_tag(inner));
        }
    }
    None
}

/// Drop parameter lists and collapse internal whitespace:
/// `character varying (255)` becomes `character varying`.
fn canonical(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut depth = 0usize;
    for ch in tag.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn scalar(tag: &str) -> NormalizedType {
    match tag {
        "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "long"
        | "serial" | "bigserial" | "smallserial" | "tinyint" => NormalizedType::Integer,

        "float" | "float4" | "float8" | "real" | "double" | "double precision" | "numeric"
        | "decimal" => NormalizedType::Float,

        "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
        | "string" | "name" | "uuid" | "citext" | "time" | "time without time zone"
        | "time with time zone" | "timetz" | "interval" => NormalizedType::String,

        // Rendered by the server as text (`$1,000.00`, `"a"=>"1"`, `(1,x)`)
        "money" | "hstore" | "record" => NormalizedType::String,

        "bool" | "boolean" => NormalizedType::Boolean,

        "timestamp" | "datetime" | "timestamp without time zone" | "timestamp with time zone"
        | "timestamptz" | "timestampntz" | "timestamptz_ntz" => NormalizedType::Timestamp,

        "date" | "pgdate" => NormalizedType::Date,

        "bytea" | "binary" | "varbinary" | "blob" => NormalizedType::Binary,

        "json" | "jsonb" | "object" | "struct" => NormalizedType::Object,

        _ => NormalizedType::Unknown,
    }
}
