//! Table query language executed on behalf of the agent.
//!
//! The model never touches the table directly. It proposes a [`TableQuery`]
//! as JSON, and [`execute`] runs it over the bound [`InspectionTable`] and
//! returns a JSON observation.
//!
//! # Operations
//!
//! | `op` | Fields | Result |
//! |------|--------|--------|
//! | `schema` | | row count, columns with inferred types |
//! | `head` | `n` | first `n` rows |
//! | `count` | `where` | number of matching rows |
//! | `select` | `columns`, `where`, `limit` | matching rows, projected |
//! | `distinct` | `column`, `where` | distinct values |
//! | `value_counts` | `column`, `where`, `limit` | value → count, descending |
//! | `stats` | `column`, `where` | count/min/max/mean/sum of numeric values |
//!
//! `where` is a list of conditions that must all hold:
//!
//! ```json
//! {"op": "select",
//!  "columns": ["city", "pipe_material"],
//!  "where": [{"column": "city", "op": "eq", "value": "Sacramento"},
//!            {"column": "requires_repair", "op": "eq", "value": true}]}
//! ```
//!
//! Columns may be dotted paths into nested objects (`location.city`).
//! String comparisons for `eq`, `ne`, `contains` and `in` ignore case.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;

use crate::models::{InspectionTable, Row};

fn default_head() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TableQuery {
    Schema,
    Head {
        #[serde(default = "default_head")]
        n: usize,
    },
    Count {
        #[serde(default, rename = "where")]
        filter: Vec<Condition>,
    },
    Select {
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default, rename = "where")]
        filter: Vec<Condition>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Distinct {
        column: String,
        #[serde(default, rename = "where")]
        filter: Vec<Condition>,
    },
    ValueCounts {
        column: String,
        #[serde(default, rename = "where")]
        filter: Vec<Condition>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Stats {
        column: String,
        #[serde(default, rename = "where")]
        filter: Vec<Condition>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: CmpOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
    IsNull,
    NotNull,
}

/// Run `query` against `table`, returning at most `max_rows` rows or
/// groups in the observation.
pub fn execute(table: &InspectionTable, query: &TableQuery, max_rows: usize) -> Result<Value> {
    match query {
        TableQuery::Schema => Ok(json!({
            "rows": table.len(),
            "columns": table.summary(),
        })),
        TableQuery::Head { n } => {
            let rows: Vec<Value> = table
                .head((*n).min(max_rows))
                .iter()
                .map(|r| Value::Object(r.record.clone()))
                .collect();
            Ok(json!({ "rows": rows }))
        }
        TableQuery::Count { filter } => {
            let matched = filter_rows(table, filter)?;
            Ok(json!({ "count": matched.len() }))
        }
        TableQuery::Select {
            columns,
            filter,
            limit,
        } => {
            for c in columns {
                check_column(table, c)?;
            }
            let matched = filter_rows(table, filter)?;
            let take = limit.unwrap_or(max_rows).min(max_rows);
            let rows: Vec<Value> = matched
                .iter()
                .take(take)
                .map(|row| project(row, columns))
                .collect();
            Ok(json!({
                "total": matched.len(),
                "returned": rows.len(),
                "truncated": rows.len() < matched.len(),
                "rows": rows,
            }))
        }
        TableQuery::Distinct { column, filter } => {
            check_column(table, column)?;
            let matched = filter_rows(table, filter)?;
            let counts = count_values(&matched, column);
            let values: Vec<Value> = counts
                .iter()
                .take(max_rows)
                .map(|(v, _)| v.clone())
                .collect();
            Ok(json!({
                "column": column,
                "total": counts.len(),
                "values": values,
            }))
        }
        TableQuery::ValueCounts {
            column,
            filter,
            limit,
        } => {
            check_column(table, column)?;
            let matched = filter_rows(table, filter)?;
            let counts = count_values(&matched, column);
            let take = limit.unwrap_or(max_rows).min(max_rows);
            let out: Vec<Value> = counts
                .iter()
                .take(take)
                .map(|(v, n)| json!({ "value": v, "count": n }))
                .collect();
            Ok(json!({
                "column": column,
                "total_groups": counts.len(),
                "counts": out,
            }))
        }
        TableQuery::Stats { column, filter } => {
            check_column(table, column)?;
            let matched = filter_rows(table, filter)?;
            let nums: Vec<f64> = matched
                .iter()
                .filter_map(|r| r.get(column).and_then(as_number))
                .collect();
            if nums.is_empty() {
                bail!("column '{}' has no numeric values in the matching rows", column);
            }
            let sum: f64 = nums.iter().sum();
            let min = nums.iter().copied().fold(f64::INFINITY, f64::min);
            let max = nums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Ok(json!({
                "column": column,
                "count": nums.len(),
                "min": min,
                "max": max,
                "mean": sum / nums.len() as f64,
                "sum": sum,
            }))
        }
    }
}

fn check_column(table: &InspectionTable, column: &str) -> Result<()> {
    if table.has_column(column) {
        return Ok(());
    }
    let head = column.split('.').next().unwrap_or(column);
    if column.contains('.') && table.has_column(head) {
        return Ok(());
    }
    bail!(
        "unknown column '{}'. Available columns: {}",
        column,
        table.columns().join(", ")
    )
}

fn filter_rows<'a>(table: &'a InspectionTable, filter: &[Condition]) -> Result<Vec<&'a Row>> {
    for cond in filter {
        check_column(table, &cond.column)?;
        let needs_value = !matches!(cond.op, CmpOp::IsNull | CmpOp::NotNull);
        if needs_value && cond.value.is_null() {
            bail!(
                "condition on '{}' with op '{:?}' requires a value",
                cond.column,
                cond.op
            );
        }
        if cond.op == CmpOp::In && !cond.value.is_array() {
            bail!("condition on '{}' with op 'in' requires an array value", cond.column);
        }
    }

    Ok(table
        .rows()
        .iter()
        .filter(|row| filter.iter().all(|c| matches_condition(row, c)))
        .collect())
}

fn matches_condition(row: &Row, cond: &Condition) -> bool {
    let cell = row.get(&cond.column);
    let ordering = || cell.and_then(|v| compare_values(v, &cond.value));
    match cond.op {
        CmpOp::IsNull => cell.is_none(),
        CmpOp::NotNull => cell.is_some(),
        CmpOp::Eq => cell.is_some_and(|v| values_equal(v, &cond.value)),
        CmpOp::Ne => cell.map_or(true, |v| !values_equal(v, &cond.value)),
        CmpOp::Gt => ordering() == Some(Ordering::Greater),
        CmpOp::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Lt => ordering() == Some(Ordering::Less),
        CmpOp::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Contains => cell.is_some_and(|v| match (v, &cond.value) {
            (Value::String(s), Value::String(needle)) => {
                s.to_lowercase().contains(&needle.to_lowercase())
            }
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            _ => false,
        }),
        CmpOp::In => cell.is_some_and(|v| {
            cond.value
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(v, item)))
        }),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.to_lowercase() == y.to_lowercase(),
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Bool(x), Value::String(y)) | (Value::String(y), Value::Bool(x)) => {
            y.eq_ignore_ascii_case(if *x { "true" } else { "false" })
        }
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn project(row: &Row, columns: &[String]) -> Value {
    if columns.is_empty() {
        return Value::Object(row.record.clone());
    }
    let mut out = serde_json::Map::new();
    for c in columns {
        out.insert(c.clone(), row.get(c).cloned().unwrap_or(Value::Null));
    }
    Value::Object(out)
}

/// Distinct non-null values with their counts, most frequent first.
/// Ties keep first-seen order.
fn count_values(rows: &[&Row], column: &str) -> Vec<(Value, usize)> {
    let mut counts: Vec<(Value, usize)> = Vec::new();
    for row in rows {
        let Some(v) = row.get(column) else {
            continue;
        };
        match counts.iter_mut().find(|(seen, _)| seen == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InspectionTable {
        let lines = [
            json!({"city": "Sacramento", "state": "CA", "material": "PVC", "repair": true, "length_ft": 120}),
            json!({"city": "Sacramento", "state": "CA", "material": "Clay", "repair": false, "length_ft": 80}),
            json!({"city": "SACRAMENTO", "state": "CA", "material": "Clay", "repair": true, "length_ft": "200"}),
            json!({"city": "Fresno", "state": "CA", "material": "PVC", "repair": true}),
            json!({"city": "Reno", "state": "NV", "location": {"district": "North"}}),
        ];
        InspectionTable::from_records(lines.into_iter().map(|v| v.as_object().cloned().unwrap()))
    }

    fn parse(v: Value) -> TableQuery {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn parses_tagged_queries() {
        assert_eq!(parse(json!({"op": "schema"})), TableQuery::Schema);
        assert_eq!(parse(json!({"op": "head"})), TableQuery::Head { n: 5 });
        let q = parse(json!({"op": "count", "where": [{"column": "city", "op": "is_null"}]}));
        match q {
            TableQuery::Count { filter } => {
                assert_eq!(filter[0].op, CmpOp::IsNull);
                assert!(filter[0].value.is_null());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn count_with_case_insensitive_eq() {
        let q = parse(json!({"op": "count", "where": [
            {"column": "city", "op": "eq", "value": "sacramento"},
            {"column": "repair", "op": "eq", "value": true}
        ]}));
        let out = execute(&table(), &q, 20).unwrap();
        assert_eq!(out["count"], 2);
    }

    #[test]
    fn select_projects_and_truncates() {
        let q = parse(json!({"op": "select", "columns": ["city", "material"]}));
        let out = execute(&table(), &q, 2).unwrap();
        assert_eq!(out["total"], 5);
        assert_eq!(out["returned"], 2);
        assert_eq!(out["truncated"], true);
        assert_eq!(out["rows"][0], json!({"city": "Sacramento", "material": "PVC"}));
    }

    #[test]
    fn numeric_compare_accepts_numeric_strings() {
        let q = parse(json!({"op": "count", "where": [
            {"column": "length_ft", "op": "gte", "value": 100}
        ]}));
        assert_eq!(execute(&table(), &q, 20).unwrap()["count"], 2);
    }

    #[test]
    fn ne_includes_missing() {
        let q = parse(json!({"op": "count", "where": [
            {"column": "material", "op": "ne", "value": "pvc"}
        ]}));
        assert_eq!(execute(&table(), &q, 20).unwrap()["count"], 3);
    }

    #[test]
    fn in_and_contains() {
        let t = table();
        let q = parse(json!({"op": "count", "where": [
            {"column": "city", "op": "in", "value": ["fresno", "reno"]}
        ]}));
        assert_eq!(execute(&t, &q, 20).unwrap()["count"], 2);

        let q = parse(json!({"op": "count", "where": [
            {"column": "city", "op": "contains", "value": "sacra"}
        ]}));
        assert_eq!(execute(&t, &q, 20).unwrap()["count"], 3);
    }

    #[test]
    fn nested_column_path() {
        let q = parse(json!({"op": "select", "columns": ["city"], "where": [
            {"column": "location.district", "op": "eq", "value": "north"}
        ]}));
        let out = execute(&table(), &q, 20).unwrap();
        assert_eq!(out["rows"], json!([{"city": "Reno"}]));
    }

    #[test]
    fn value_counts_descending() {
        let q = parse(json!({"op": "value_counts", "column": "material"}));
        let out = execute(&table(), &q, 20).unwrap();
        assert_eq!(out["total_groups"], 2);
        assert_eq!(out["counts"][0], json!({"value": "PVC", "count": 2}));
        assert_eq!(out["counts"][1], json!({"value": "Clay", "count": 2}));
    }

    #[test]
    fn distinct_values() {
        let q = parse(json!({"op": "distinct", "column": "state"}));
        let out = execute(&table(), &q, 20).unwrap();
        assert_eq!(out["values"], json!(["CA", "NV"]));
    }

    #[test]
    fn stats_over_numeric_values() {
        let q = parse(json!({"op": "stats", "column": "length_ft"}));
        let out = execute(&table(), &q, 20).unwrap();
        assert_eq!(out["count"], 3);
        assert_eq!(out["min"], 80.0);
        assert_eq!(out["max"], 200.0);
        assert_eq!(out["sum"], 400.0);
    }

    #[test]
    fn stats_without_numbers_is_an_error() {
        let q = parse(json!({"op": "stats", "column": "city"}));
        assert!(execute(&table(), &q, 20).is_err());
    }

    #[test]
    fn unknown_column_lists_available() {
        let q = parse(json!({"op": "distinct", "column": "pipe"}));
        let err = execute(&table(), &q, 20).unwrap_err().to_string();
        assert!(err.contains("unknown column 'pipe'"));
        assert!(err.contains("material"));
    }

    #[test]
    fn missing_value_is_an_error() {
        let q = parse(json!({"op": "count", "where": [{"column": "city", "op": "eq"}]}));
        assert!(execute(&table(), &q, 20).is_err());
    }
}
