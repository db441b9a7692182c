// tabula_core/src/domain.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TabulaError};

/// Page size used by `list` when the caller does not pass a limit.
///
/// Callers that need the whole table must either raise `limit` or use
/// `list_all`; a table with more rows than this comes back truncated.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Key names tried, in order, when a table's primary key is not known.
pub const DEFAULT_KEY_FIELDS: [&str; 4] = ["Id", "id", "ID", "row_id"];

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(String);

impl TableId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TabulaError::Config("table identifier is empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Interprets a JSON value as an identifier; null, empty strings and
    /// structured values are not identifiers.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(RecordId::Int(i)),
                None => Some(RecordId::Text(n.to_string())),
            },
            Value::String(s) if !s.trim().is_empty() => Some(RecordId::Text(s.trim().to_string())),
            _ => None,
        }
    }

    /// Parses user input; numeric text becomes `Int` so it round-trips as a number.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TabulaError::Config("record identifier is empty".into()));
        }
        Ok(raw
            .parse::<i64>()
            .map(RecordId::Int)
            .unwrap_or_else(|_| RecordId::Text(raw.to_string())))
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(v: i64) -> Self {
        RecordId::Int(v)
    }
}

impl From<&str> for RecordId {
    fn from(v: &str) -> Self {
        RecordId::Text(v.to_string())
    }
}

impl From<String> for RecordId {
    fn from(v: String) -> Self {
        RecordId::Text(v)
    }
}

/// One row of a remote table. Field order follows the backend's response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites fields with those of `other`, appending new ones.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// First of `candidates` present on the record with a usable id value.
    pub fn key_field<'a, S: AsRef<str>>(&self, candidates: &'a [S]) -> Option<&'a str> {
        candidates
            .iter()
            .map(|s| s.as_ref())
            .find(|name| self.get(name).and_then(RecordId::from_value).is_some())
    }

    pub fn key_value<S: AsRef<str>>(&self, candidates: &[S]) -> Option<RecordId> {
        self.key_field(candidates)
            .and_then(|name| self.get(name))
            .and_then(RecordId::from_value)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Object(r.0)
    }
}

/// Structured `where` expression in the backend's `(field,op,value)` syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Cmp {
        field: String,
        op: &'static str,
        value: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Raw(String),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl fmt::Display) -> Self {
        Filter::Cmp {
            field: field.into(),
            op: "eq",
            value: value.to_string(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut v) => {
                v.push(other);
                Filter::And(v)
            }
            f => Filter::And(vec![f, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut v) => {
                v.push(other);
                Filter::Or(v)
            }
            f => Filter::Or(vec![f, other]),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Cmp { field, op, value } => write!(f, "({field},{op},{value})"),
            Filter::Raw(s) => f.write_str(s),
            Filter::And(parts) | Filter::Or(parts) => {
                let joiner = if matches!(self, Filter::And(_)) {
                    "~and"
                } else {
                    "~or"
                };
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    match p {
                        Filter::And(_) | Filter::Or(_) => write!(f, "({p})")?,
                        _ => write!(f, "{p}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parses `-field` / `field`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().strip_prefix('-') {
            Some(f) => Sort::desc(f),
            None => Sort::asc(raw.trim()),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        f.write_str(&self.field)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListParams {
    pub view_id: Option<String>,
    pub fields: Vec<String>,
    pub filter: Option<Filter>,
    pub sort: Vec<Sort>,
    /// `None` means `DEFAULT_PAGE_SIZE`.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListParams {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query pairs in the order they are sent; limit and offset are always present.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(v) = &self.view_id {
            q.push(("viewId", v.clone()));
        }
        if !self.fields.is_empty() {
            q.push(("fields", self.fields.join(",")));
        }
        if let Some(w) = &self.filter {
            q.push(("where", w.to_string()));
        }
        if !self.sort.is_empty() {
            let s: Vec<String> = self.sort.iter().map(ToString::to_string).collect();
            q.push(("sort", s.join(",")));
        }
        q.push(("limit", self.effective_limit().to_string()));
        q.push(("offset", self.effective_offset().to_string()));
        q
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub is_first_page: Option<bool>,
    #[serde(default)]
    pub is_last_page: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub page_info: Option<PageInfo>,
}

/// Result of a conditional list fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum ListFetch {
    Fresh {
        etag: Option<String>,
        records: Vec<Record>,
    },
    /// Nothing changed since the supplied etag; keep the previous list.
    NotModified { etag: Option<String> },
}

impl ListFetch {
    pub fn etag(&self) -> Option<&str> {
        match self {
            ListFetch::Fresh { etag, .. } | ListFetch::NotModified { etag } => etag.as_deref(),
        }
    }
}

fn null_as_default<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// `true`, `1` and `"true"`/`"1"` are set; anything else, null included, is not.
fn lenient_bool<'de, D>(de: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub pk: bool,
}

impl ColumnMeta {
    /// Title when set, else the column name.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.column_name.as_deref())
            .unwrap_or("-")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub primary_key: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    /// Declared key: explicit `primaryKey` first, then the first `pk` column.
    pub fn primary_key_name(&self) -> Option<&str> {
        self.primary_key
            .iter()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .or_else(|| {
                self.columns
                    .iter()
                    .filter(|c| c.pk)
                    .filter_map(|c| c.column_name.as_deref())
                    .find(|n| !n.is_empty())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_table_id_is_a_config_error() {
        assert!(matches!(TableId::new("  "), Err(TabulaError::Config(_))));
        assert_eq!(TableId::new(" m1 ").unwrap().as_str(), "m1");
    }

    #[test]
    fn default_limit_is_explicit_in_query() {
        let q = ListParams::default().query_pairs();
        assert!(q.contains(&("limit", "25".to_string())));
        assert!(q.contains(&("offset", "0".to_string())));
    }

    #[test]
    fn filters_render_in_backend_syntax() {
        let f = Filter::eq("email", "a@b.c").and(Filter::eq("ativo", true));
        assert_eq!(f.to_string(), "(email,eq,a@b.c)~and(ativo,eq,true)");
        let o = Filter::eq("Id", 1).or(Filter::eq("id", 1));
        assert_eq!(o.to_string(), "(Id,eq,1)~or(id,eq,1)");
        let nested = Filter::eq("a", 1).and(Filter::eq("b", 2).or(Filter::eq("c", 3)));
        assert_eq!(nested.to_string(), "(a,eq,1)~and((b,eq,2)~or(c,eq,3))");
    }

    #[test]
    fn sort_parses_descending_prefix() {
        assert_eq!(Sort::parse("-CreatedAt"), Sort::desc("CreatedAt"));
        assert_eq!(Sort::parse("Id").to_string(), "Id");
    }

    #[test]
    fn key_value_skips_null_and_blank_candidates() {
        let r = Record::from_value(json!({"Id": null, "id": " ", "row_id": 42})).unwrap();
        assert_eq!(r.key_field(&DEFAULT_KEY_FIELDS), Some("row_id"));
        assert_eq!(r.key_value(&DEFAULT_KEY_FIELDS), Some(RecordId::Int(42)));
    }

    #[test]
    fn record_id_parse_prefers_integers() {
        assert_eq!(RecordId::parse("17").unwrap(), RecordId::Int(17));
        assert_eq!(RecordId::parse("abc").unwrap(), RecordId::Text("abc".into()));
        assert!(RecordId::parse("").is_err());
    }

    #[test]
    fn meta_primary_key_falls_back_to_pk_column() {
        let meta: TableMeta = serde_json::from_value(json!({
            "id": "t1",
            "columns": [{"column_name": "title"}, {"column_name": "row_id", "pk": true}]
        }))
        .unwrap();
        assert_eq!(meta.primary_key_name(), Some("row_id"));

        let declared: TableMeta =
            serde_json::from_value(json!({"primaryKey": ["uuid"], "columns": []})).unwrap();
        assert_eq!(declared.primary_key_name(), Some("uuid"));
    }

    #[test]
    fn meta_tolerates_null_names_and_numeric_pk_flags() {
        let meta: TableMeta = serde_json::from_value(json!({
            "id": null,
            "primaryKey": null,
            "columns": [
                {"column_name": null, "title": "Nome", "pk": 0},
                {"column_name": "nc_id", "pk": 1}
            ]
        }))
        .unwrap();
        assert_eq!(meta.primary_key_name(), Some("nc_id"));
        assert_eq!(meta.columns[0].label(), "Nome");
        assert!(!meta.columns[0].pk);
        assert!(meta.id.is_empty());
    }
}
