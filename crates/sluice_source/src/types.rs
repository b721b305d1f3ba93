//! Core data model: normalized types, table schemas, selections, raw values
//! and record envelopes.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use sluice_protocol::{ConfiguredCatalog, RecordMessage, Stream, SyncMode};

use crate::mapper;

/// Sync modes every discovered stream advertises.
pub const SUPPORTED_SYNC_MODES: &[SyncMode] = &[SyncMode::FullRefresh];

// ============================================================================
// Normalized types
// ============================================================================

/// Store-agnostic column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedType {
    Integer,
    Float,
    String,
    Boolean,
    Timestamp,
    Date,
    Binary,
    /// Homogeneous array; the element type is `Unknown` when the store does not say
    Array(Box<NormalizedType>),
    Object,
    /// Unrecognized native type, rendered as an opaque schema
    Unknown,
}

impl NormalizedType {
    /// JSON-schema `type` keyword for this type, `None` for `Unknown`.
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            NormalizedType::Integer => Some("integer"),
            NormalizedType::Float => Some("number"),
            NormalizedType::String
            | NormalizedType::Timestamp
            | NormalizedType::Date
            | NormalizedType::Binary => Some("string"),
            NormalizedType::Boolean => Some("boolean"),
            NormalizedType::Array(_) => Some("array"),
            NormalizedType::Object => Some("object"),
            NormalizedType::Unknown => None,
        }
    }

    fn schema_fragment(&self, nullable: bool) -> Value {
        let Some(json_type) = self.json_type() else {
            return Value::Object(Map::new());
        };

        let mut fragment = Map::new();
        let type_value = if nullable {
            json!(["null", json_type])
        } else {
            json!(json_type)
        };
        fragment.insert("type".to_string(), type_value);

        match self {
            NormalizedType::Timestamp => {
                fragment.insert("format".to_string(), json!("date-time"));
            }
            NormalizedType::Date => {
                fragment.insert("format".to_string(), json!("date"));
            }
            NormalizedType::Binary => {
                fragment.insert("contentEncoding".to_string(), json!("base64"));
            }
            NormalizedType::Array(item) => {
                fragment.insert("items".to_string(), item.schema_fragment(false));
            }
            _ => {}
        }
        Value::Object(fragment)
    }
}

/// A normalized type plus nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub ty: NormalizedType,
    pub nullable: bool,
}

impl ColumnType {
    pub fn new(ty: NormalizedType, nullable: bool) -> Self {
        Self { ty, nullable }
    }

    /// Render as a JSON-schema fragment. Nullable columns get a `["null", t]` union.
    pub fn json_schema(&self) -> Value {
        self.ty.schema_fragment(self.nullable)
    }
}

// ============================================================================
// Column metadata
// ============================================================================

/// One row of describe-columns output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub table: String,
    pub name: String,
    pub native_type: String,
    pub nullable: bool,
}

impl ColumnDescriptor {
    /// Build from a describe-columns row shaped `(table, column, type, nullable)`.
    ///
    /// Nullability may arrive as a boolean, an integer flag, or text
    /// (`YES`/`NO`, `t`/`f`, `true`/`false`).
    pub fn from_row(table: &str, row: &[RawValue]) -> Result<Self, String> {
        if row.len() < 4 {
            return Err(format!(
                "describe-columns row has {} values, expected 4",
                row.len()
            ));
        }
        let name = match &row[1] {
            RawValue::Text(name) => name.clone(),
            other => return Err(format!("column name is not text: {:?}", other)),
        };
        let native_type = match &row[2] {
            RawValue::Text(ty) => ty.clone(),
            RawValue::Null => String::new(),
            other => return Err(format!("type of column '{}' is not text: {:?}", name, other)),
        };
        let nullable = match &row[3] {
            RawValue::Boolean(flag) => *flag,
            RawValue::Integer(flag) => *flag != 0,
            RawValue::Null => true,
            RawValue::Text(flag) => match flag.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "t" | "true" | "1" => true,
                "no" | "n" | "f" | "false" | "0" => false,
                _ => return Err(format!("unrecognized nullability flag '{}'", flag)),
            },
            other => return Err(format!("nullability of '{}' is not a flag: {:?}", name, other)),
        };
        Ok(Self {
            table: table.to_string(),
            name,
            native_type,
            nullable,
        })
    }
}

/// A named column with its normalized type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

/// Normalized schema of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    /// Columns in discovery order
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Map every descriptor through the type mapper, keeping their order.
    pub fn from_descriptors(name: impl Into<String>, descriptors: &[ColumnDescriptor]) -> Self {
        let columns = descriptors
            .iter()
            .map(|d| ColumnSchema {
                name: d.name.clone(),
                column_type: mapper::map(&d.native_type, d.nullable),
            })
            .collect();
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Wire representation advertised by `discover`.
    pub fn to_stream(&self) -> Stream {
        let properties: Map<String, Value> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type.json_schema()))
            .collect();
        Stream::new(self.name.clone(), properties, SUPPORTED_SYNC_MODES.to_vec())
    }
}

/// Every table schema found by one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Catalog {
    pub tables: Vec<TableSchema>,
}

impl Catalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_wire(&self) -> sluice_protocol::Catalog {
        sluice_protocol::Catalog {
            streams: self.tables.iter().map(TableSchema::to_stream).collect(),
        }
    }
}

// ============================================================================
// Selections
// ============================================================================

/// One table chosen for extraction and the columns to project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredTable {
    pub name: String,
    pub columns: Vec<String>,
}

/// Ordered list of tables to read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfiguredSelection {
    tables: Vec<ConfiguredTable>,
}

impl ConfiguredSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table names and `json_schema.properties` keys of each configured stream.
    pub fn from_configured_catalog(catalog: &ConfiguredCatalog) -> Self {
        let tables = catalog
            .streams
            .iter()
            .map(|configured| ConfiguredTable {
                name: configured.stream.name.clone(),
                columns: configured.stream.property_names(),
            })
            .collect();
        Self { tables }
    }

    /// Select every column of every table in a discovered catalog.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let tables = catalog
            .tables
            .iter()
            .map(|t| ConfiguredTable {
                name: t.name.clone(),
                columns: t.column_names(),
            })
            .collect();
        Self { tables }
    }

    pub fn with_table<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.push(ConfiguredTable {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn tables(&self) -> &[ConfiguredTable] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl IntoIterator for ConfiguredSelection {
    type Item = ConfiguredTable;
    type IntoIter = std::vec::IntoIter<ConfiguredTable>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

// ============================================================================
// Raw values
// ============================================================================

/// A value as decoded by a transport, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Exact decimal text, e.g. `NUMERIC` output
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Array(Vec<RawValue>),
    Json(Value),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::Integer(v as i64)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Boolean(v)
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(v: Vec<u8>) -> Self {
        RawValue::Bytes(v)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(v: NaiveDate) -> Self {
        RawValue::Date(v)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(v: NaiveDateTime) -> Self {
        RawValue::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for RawValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        RawValue::TimestampTz(v)
    }
}

impl From<Value> for RawValue {
    fn from(v: Value) -> Self {
        RawValue::Json(v)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => RawValue::Null,
        }
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// One normalized row, tagged with the table it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEnvelope {
    pub table: String,
    /// Column name to JSON value, in projection order
    pub data: Map<String, Value>,
}

impl RecordEnvelope {
    pub fn into_message(self, emitted_at: i64) -> RecordMessage {
        RecordMessage {
            stream: self.table,
            data: self.data,
            emitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, ty: &str, nullable: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            table: "t".to_string(),
            name: name.to_string(),
            native_type: ty.to_string(),
            nullable,
        }
    }

    #[test]
    fn test_nullable_union() {
        let ty = ColumnType::new(NormalizedType::Integer, true);
        assert_eq!(ty.json_schema(), json!({"type": ["null", "integer"]}));

        let ty = ColumnType::new(NormalizedType::Integer, false);
        assert_eq!(ty.json_schema(), json!({"type": "integer"}));
    }

    #[test]
    fn test_unknown_is_opaque_even_when_nullable() {
        assert_eq!(
            ColumnType::new(NormalizedType::Unknown, true).json_schema(),
            json!({})
        );
    }

    #[test]
    fn test_format_annotations() {
        assert_eq!(
            ColumnType::new(NormalizedType::Timestamp, true).json_schema(),
            json!({"type": ["null", "string"], "format": "date-time"})
        );
        assert_eq!(
            ColumnType::new(NormalizedType::Binary, false).json_schema(),
            json!({"type": "string", "contentEncoding": "base64"})
        );
        assert_eq!(
            ColumnType::new(
                NormalizedType::Array(Box::new(NormalizedType::Date)),
                false
            )
            .json_schema(),
            json!({"type": "array", "items": {"type": "string", "format": "date"}})
        );
    }

    #[test]
    fn test_descriptor_from_row_accepts_flag_shapes() {
        let row = vec![
            RawValue::from("users"),
            RawValue::from("id"),
            RawValue::from("bigint"),
            RawValue::from("NO"),
        ];
        let d = ColumnDescriptor::from_row("users", &row).unwrap();
        assert_eq!(d.name, "id");
        assert!(!d.nullable);

        let row = vec![
            RawValue::from("users"),
            RawValue::from("name"),
            RawValue::from("text"),
            RawValue::Boolean(true),
        ];
        assert!(ColumnDescriptor::from_row("users", &row).unwrap().nullable);

        let row = vec![
            RawValue::from("users"),
            RawValue::from("name"),
            RawValue::from("text"),
            RawValue::Integer(0),
        ];
        assert!(!ColumnDescriptor::from_row("users", &row).unwrap().nullable);
    }

    #[test]
    fn test_descriptor_from_short_row_fails() {
        let row = vec![RawValue::from("users"), RawValue::from("id")];
        assert!(ColumnDescriptor::from_row("users", &row).is_err());
    }

    #[test]
    fn test_table_schema_keeps_column_order() {
        let schema = TableSchema::from_descriptors(
            "users",
            &[
                descriptor("zeta", "int", false),
                descriptor("alpha", "varchar(20)", true),
            ],
        );
        assert_eq!(schema.column_names(), vec!["zeta", "alpha"]);

        let stream = schema.to_stream();
        assert_eq!(stream.property_names(), vec!["zeta", "alpha"]);
        assert_eq!(stream.supported_sync_modes, vec![SyncMode::FullRefresh]);
        assert_eq!(
            stream.json_schema["properties"]["alpha"],
            json!({"type": ["null", "string"]})
        );
    }

    #[test]
    fn test_selection_from_configured_catalog() {
        let raw = r#"{"streams": [
            {"stream": {"name": "orders", "json_schema": {"properties": {"b": {}, "a": {}}}}},
            {"stream": {"name": "users", "json_schema": {}}}
        ]}"#;
        let catalog = ConfiguredCatalog::from_json_str(raw).unwrap();
        let selection = ConfiguredSelection::from_configured_catalog(&catalog);

        assert_eq!(selection.len(), 2);
        assert_eq!(selection.tables()[0].name, "orders");
        assert_eq!(selection.tables()[0].columns, vec!["b", "a"]);
        assert!(selection.tables()[1].columns.is_empty());
    }

    #[test]
    fn test_raw_value_from_option() {
        assert_eq!(RawValue::from(None::<i64>), RawValue::Null);
        assert_eq!(RawValue::from(Some("x")), RawValue::Text("x".to_string()));
    }
}
