//! Query-related data models.
//!
//! This module defines statement parameters, statement routing, and the two
//! result shapes: row sets and execution summaries.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default cap on rows materialized per query.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Maximum allowed row cap.
pub const MAX_ROW_LIMIT: usize = 100_000;

/// A single result row: column name to value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized statements.
///
/// In JSON, scalars map to the matching variant and binary data is written as
/// `{"base64": "..."}` so it cannot be mistaken for a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data, `{"base64": "..."}` in JSON
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Parse a command-line argument: JSON scalars and `{"base64": "..."}` are
    /// recognized, anything else is taken as a plain string.
    pub fn from_cli_arg(arg: &str) -> Self {
        match serde_json::from_str::<JsonValue>(arg) {
            Ok(JsonValue::Null) => Self::Null,
            Ok(JsonValue::Bool(v)) => Self::Bool(v),
            Ok(JsonValue::Number(n)) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .unwrap_or_else(|| Self::String(arg.to_string())),
            },
            Ok(JsonValue::String(s)) => Self::String(s),
            Ok(object @ JsonValue::Object(_)) => serde_json::from_value(object)
                .unwrap_or_else(|_| Self::String(arg.to_string())),
            _ => Self::String(arg.to_string()),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Binary data as a `{"base64": "..."}` object.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Encoded {
        base64: String,
    }

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Encoded {
            base64: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Encoded::deserialize(deserializer)?;
        STANDARD
            .decode(&encoded.base64)
            .map_err(serde::de::Error::custom)
    }
}

/// Which execution path a statement takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a result set.
    Query,
    /// Produces an affected-row count.
    Execute,
}

/// Leading keywords that produce a result set.
const ROW_KEYWORDS: &[&str] = &[
    "SELECT", "SHOW", "EXPLAIN", "WITH", "VALUES", "PRAGMA", "DESCRIBE", "DESC",
];

impl StatementKind {
    /// Classify a SQL statement by its leading keyword, case-insensitively.
    ///
    /// Leading whitespace, `--` and `/* */` comments, and opening parentheses are
    /// skipped. This is not a parser: it only routes the statement.
    pub fn classify_sql(sql: &str) -> Self {
        match leading_keyword(sql) {
            Some(word) if ROW_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) => {
                Self::Query
            }
            _ => Self::Execute,
        }
    }
}

/// Return the first keyword of a statement.
pub fn leading_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let word = &rest[..end];
    (!word.is_empty()).then_some(word)
}

/// Finite, single-pass sequence of rows.
///
/// Iterating consumes the rows; once drained the set cannot be replayed.
#[derive(Debug)]
pub struct RowSet {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    truncated: bool,
}

impl RowSet {
    /// Create a row set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Row>, truncated: bool) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            truncated,
        }
    }

    /// Create an empty row set.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), false)
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// True if the row cap cut the result short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Drain the remaining rows into a vector.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows.collect()
    }
}

impl Iterator for RowSet {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for RowSet {}

/// Summary of a statement without a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    /// Not every backend reports one (PostgreSQL never does).
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(affected_rows: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            affected_rows,
            last_insert_id,
        }
    }
}

/// Result of running a statement through the service.
#[derive(Debug)]
pub enum QueryOutcome {
    Rows(RowSet),
    Exec(ExecResult),
}

impl QueryOutcome {
    /// Take the row set, if this outcome has one.
    pub fn into_rows(self) -> Option<RowSet> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Exec(_) => None,
        }
    }

    /// Take the execution summary, if this outcome has one.
    pub fn into_exec(self) -> Option<ExecResult> {
        match self {
            Self::Rows(_) => None,
            Self::Exec(result) => Some(result),
        }
    }

    /// Drain into the JSON response shape.
    pub fn into_json(self) -> JsonValue {
        match self {
            Self::Rows(rows) => JsonValue::Array(rows.map(JsonValue::Object).collect()),
            Self::Exec(result) => serde_json::json!({
                "affected_rows": result.affected_rows,
                "last_insert_id": result.last_insert_id,
            }),
        }
    }
}

/// Inbound query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl QueryRequest {
    /// Create a new request without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter to this request.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
    }

    #[test]
    fn test_query_param_untagged_json() {
        let params: Vec<QueryParam> = serde_json::from_str(r#"[null, true, 42, 1.5, "x"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(42),
                QueryParam::Float(1.5),
                QueryParam::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_bytes_param_survives_json() {
        let bytes = QueryParam::Bytes(vec![0x00, 0xff, 0x10]);
        let json = serde_json::to_value(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({"base64": "AP8Q"}));
        assert_eq!(serde_json::from_value::<QueryParam>(json).unwrap(), bytes);

        // A string that happens to be valid base64 stays a string.
        let text: QueryParam = serde_json::from_str(r#""AP8Q""#).unwrap();
        assert_eq!(text, QueryParam::String("AP8Q".to_string()));
    }

    #[test]
    fn test_request_with_bytes_roundtrip() {
        let req = QueryRequest::new("INSERT INTO blobs (data, label) VALUES (?, ?)")
            .with_param(QueryParam::Bytes(b"\x89PNG".to_vec()))
            .with_param("logo");
        let text = serde_json::to_string(&req).unwrap();
        let back: QueryRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.params, req.params);
        assert_eq!(back.params[0].type_name(), "bytes");
    }

    #[test]
    fn test_malformed_bytes_object_rejected() {
        assert!(serde_json::from_str::<QueryParam>(r#"{"base64": "not base64!"}"#).is_err());
        assert!(serde_json::from_str::<QueryParam>(r#"{"base64": "AA==", "x": 1}"#).is_err());
    }

    #[test]
    fn test_query_param_from_cli_arg() {
        assert_eq!(QueryParam::from_cli_arg("42"), QueryParam::Int(42));
        assert_eq!(QueryParam::from_cli_arg("null"), QueryParam::Null);
        assert_eq!(QueryParam::from_cli_arg("false"), QueryParam::Bool(false));
        assert_eq!(QueryParam::from_cli_arg("2.5"), QueryParam::Float(2.5));
        assert_eq!(
            QueryParam::from_cli_arg("alice"),
            QueryParam::String("alice".to_string())
        );
        assert_eq!(
            QueryParam::from_cli_arg(r#""quoted""#),
            QueryParam::String("quoted".to_string())
        );
        assert_eq!(
            QueryParam::from_cli_arg(r#"{"base64": "AQI="}"#),
            QueryParam::Bytes(vec![1, 2])
        );
        assert_eq!(
            QueryParam::from_cli_arg(r#"{"a": 1}"#),
            QueryParam::String(r#"{"a": 1}"#.to_string())
        );
    }

    #[test]
    fn test_classify_row_statements() {
        assert_eq!(StatementKind::classify_sql("SELECT 1"), StatementKind::Query);
        assert_eq!(StatementKind::classify_sql("  select * from t"), StatementKind::Query);
        assert_eq!(StatementKind::classify_sql("Show tables"), StatementKind::Query);
        assert_eq!(
            StatementKind::classify_sql("EXPLAIN SELECT 1"),
            StatementKind::Query
        );
        assert_eq!(
            StatementKind::classify_sql("(SELECT 1) UNION (SELECT 2)"),
            StatementKind::Query
        );
    }

    #[test]
    fn test_classify_write_statements() {
        assert_eq!(
            StatementKind::classify_sql("INSERT INTO t(x) VALUES(?)"),
            StatementKind::Execute
        );
        assert_eq!(
            StatementKind::classify_sql("update t set x = 1"),
            StatementKind::Execute
        );
        assert_eq!(
            StatementKind::classify_sql("CREATE TABLE t (x INT)"),
            StatementKind::Execute
        );
        assert_eq!(StatementKind::classify_sql(""), StatementKind::Execute);
    }

    #[test]
    fn test_classify_skips_comments() {
        assert_eq!(
            StatementKind::classify_sql("-- fetch\nSELECT 1"),
            StatementKind::Query
        );
        assert_eq!(
            StatementKind::classify_sql("/* hint */ DELETE FROM t"),
            StatementKind::Execute
        );
        assert_eq!(
            StatementKind::classify_sql("/* a */ /* b */\n  select 1"),
            StatementKind::Query
        );
    }

    #[test]
    fn test_keyword_prefix_does_not_match() {
        // "SELECTED" is not "SELECT"
        assert_eq!(leading_keyword("SELECTED x"), Some("SELECTED"));
        assert_eq!(StatementKind::classify_sql("SELECTED x"), StatementKind::Execute);
    }

    #[test]
    fn test_row_set_is_single_pass() {
        let mut row = Row::new();
        row.insert("b".to_string(), JsonValue::from(2));
        row.insert("a".to_string(), JsonValue::from(1));
        let mut rows = RowSet::new(vec!["b".into(), "a".into()], vec![row], false);

        assert_eq!(rows.remaining(), 1);
        let first = rows.next().unwrap();
        let keys: Vec<_> = first.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(rows.next().is_none());
        assert_eq!(rows.remaining(), 0);
    }

    #[test]
    fn test_exec_outcome_json() {
        let outcome = QueryOutcome::Exec(ExecResult::new(1, Some(7)));
        let json = outcome.into_json();
        assert_eq!(json["affected_rows"], 1);
        assert_eq!(json["last_insert_id"], 7);
    }

    #[test]
    fn test_request_builder() {
        let req = QueryRequest::new("SELECT ?").with_param(42i64).with_param("x");
        assert_eq!(req.params.len(), 2);
    }
}
