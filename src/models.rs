//! Core data models used throughout the crate.
//!
//! An [`InspectionTable`] is an immutable, column-union view over raw JSON
//! records. Records are never validated against a schema: columns are
//! discovered from the keys actually present, and a row simply lacks the
//! columns it never mentioned.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One parsed JSON-lines record.
pub type Record = Map<String, Value>;

/// A record together with its position in the full inspection table.
///
/// The id survives sampling, so two subsets can be compared by row identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: usize,
    pub record: Record,
}

/// In-memory table of inspection records.
#[derive(Debug, Clone, Default)]
pub struct InspectionTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl InspectionTable {
    /// Build a table from records in order. Row ids are assigned `0..n`.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut columns = Vec::new();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for (id, record) in records.into_iter().enumerate() {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
            rows.push(Row { id, record });
        }

        Self { columns, rows }
    }

    /// A new table holding the given rows of `self`, in the given order.
    ///
    /// The parent's column set is kept even if no selected row uses a column.
    pub(crate) fn subset(&self, positions: impl IntoIterator<Item = usize>) -> Self {
        let rows = positions
            .into_iter()
            .filter_map(|pos| self.rows.get(pos).cloned())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Per-column inferred type and non-null count.
    pub fn summary(&self) -> Vec<ColumnSummary> {
        self.columns
            .iter()
            .map(|column| {
                let mut kind: Option<&'static str> = None;
                let mut non_null = 0usize;
                for row in &self.rows {
                    let Some(value) = row.record.get(column) else {
                        continue;
                    };
                    if value.is_null() {
                        continue;
                    }
                    non_null += 1;
                    let this = value_kind(value);
                    kind = match kind {
                        None => Some(this),
                        Some(k) if k == this => Some(k),
                        Some("int") if this == "float" => Some("float"),
                        Some("float") if this == "int" => Some("float"),
                        Some(_) => Some("mixed"),
                    };
                }
                ColumnSummary {
                    name: column.clone(),
                    dtype: kind.unwrap_or("null").to_string(),
                    non_null,
                }
            })
            .collect()
    }
}

impl Row {
    /// Look up a column, following dotted paths into nested objects.
    ///
    /// A top-level key that itself contains a dot wins over path traversal.
    /// Missing keys and explicit JSON nulls both return `None`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        if let Some(v) = self.record.get(column) {
            return (!v.is_null()).then_some(v);
        }
        let mut parts = column.split('.');
        let mut current = self.record.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        (!current.is_null()).then_some(current)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shape of one column, as shown to the agent and printed by `sewerq load`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
    pub non_null: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn table() -> InspectionTable {
        InspectionTable::from_records(vec![
            record(json!({"city": "Sacramento", "material": "PVC", "length": 120})),
            record(json!({"city": "Fresno", "repair": true})),
            record(json!({"city": "Davis", "length": 80.5, "location": {"state": "CA"}})),
        ])
    }

    #[test]
    fn columns_are_union_in_first_seen_order() {
        let t = table();
        assert_eq!(
            t.columns(),
            &["city", "material", "length", "repair", "location"]
        );
        assert_eq!(t.len(), 3);
        assert_eq!(t.row_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_column_reads_as_none() {
        let t = table();
        assert_eq!(t.rows()[1].get("material"), None);
        assert_eq!(t.rows()[1].get("repair"), Some(&json!(true)));
    }

    #[test]
    fn dotted_path_reaches_nested_value() {
        let t = table();
        assert_eq!(t.rows()[2].get("location.state"), Some(&json!("CA")));
        assert_eq!(t.rows()[2].get("location.zip"), None);
        assert_eq!(t.rows()[0].get("location.state"), None);
    }

    #[test]
    fn explicit_null_reads_as_none() {
        let t = InspectionTable::from_records(vec![record(json!({"a": null}))]);
        assert_eq!(t.columns(), &["a"]);
        assert_eq!(t.rows()[0].get("a"), None);
    }

    #[test]
    fn subset_keeps_parent_columns_and_ids() {
        let t = table();
        let s = t.subset([2, 0]);
        assert_eq!(s.columns(), t.columns());
        assert_eq!(s.row_ids(), vec![2, 0]);
    }

    #[test]
    fn summary_infers_types() {
        let summary = table().summary();
        let by_name = |n: &str| summary.iter().find(|c| c.name == n).unwrap().clone();
        assert_eq!(by_name("city").dtype, "string");
        assert_eq!(by_name("city").non_null, 3);
        assert_eq!(by_name("length").dtype, "float");
        assert_eq!(by_name("length").non_null, 2);
        assert_eq!(by_name("repair").dtype, "bool");
        assert_eq!(by_name("location").dtype, "object");
    }

    #[test]
    fn head_clamps_to_len() {
        let t = table();
        assert_eq!(t.head(2).len(), 2);
        assert_eq!(t.head(10).len(), 3);
    }
}
