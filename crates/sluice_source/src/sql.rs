//! SQL text helpers: identifier quoting, projection building and the
//! statement fingerprints attached to query spans.

use crate::transport::Dialect;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

/// Quote each dot-separated segment of a qualified name.
pub fn quote_ident_path(path: &str) -> String {
    path.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// First keyword of a statement, for span fields.
pub fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

/// FNV-1a 64-bit fingerprint of a statement.
pub fn hash_sql(sql: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

/// `SELECT "c1", "c2" FROM <table>` with every identifier quoted.
///
/// `columns` must not be empty.
pub fn projection_query(
    dialect: &dyn Dialect,
    namespace: Option<&str>,
    table: &str,
    columns: &[String],
) -> String {
    let projection = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {}",
        projection,
        dialect.qualified_table(namespace, table)
    )
}

/// Metadata queries against `information_schema`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn list_tables_sql(&self, namespace: Option<&str>) -> String {
        format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = {} AND table_type IN ('BASE TABLE', 'VIEW') \
             ORDER BY table_name",
            schema_predicate(namespace)
        )
    }

    fn describe_columns_sql(&self, namespace: Option<&str>, table: &str) -> String {
        format!(
            "SELECT table_name, column_name, \
             CASE WHEN data_type = 'ARRAY' THEN udt_name ELSE data_type END, \
             is_nullable = 'YES' \
             FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} \
             ORDER BY ordinal_position",
            schema_predicate(namespace),
            quote_literal(table)
        )
    }
}

fn schema_predicate(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => quote_literal(ns),
        None => "current_schema()".to_string(),
    }
}
