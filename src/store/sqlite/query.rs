//! Translates [`Filter`] trees into SQL over the collection table layout.
//!
//! `id` and `version` map to their own columns; open fields are read out of
//! the JSON `body` column with `json_extract` / `json_type`. Every value and
//! JSON path is a bound parameter.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::document::{ID_FIELD, VERSION_FIELD};
use crate::error::{MigrateError, Result};
use crate::store::Filter;

/// A compiled `WHERE` clause and its parameters, in order.
#[derive(Debug, Default)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

pub fn compile(filter: &Filter) -> Result<SqlPredicate> {
    let mut params = Vec::new();
    let sql = compile_into(filter, &mut params)?;
    Ok(SqlPredicate { sql, params })
}

fn compile_into(filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    let sql = match filter {
        Filter::All => "1".to_string(),
        Filter::Eq(field, value) => compile_eq(field, value, params)?,
        Filter::Lt(field, bound) if field == VERSION_FIELD => {
            params.push(SqlValue::Integer(*bound));
            "COALESCE(version, 0) < ?".to_string()
        }
        Filter::Lt(field, _) if field == ID_FIELD => "0".to_string(),
        Filter::Lt(field, bound) => {
            let path = json_path(field)?;
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Integer(*bound));
            "(json_type(body, ?) IN ('integer', 'real') AND json_extract(body, ?) < ?)".to_string()
        }
        Filter::Absent(field) if field == VERSION_FIELD => "version IS NULL".to_string(),
        Filter::Absent(field) if field == ID_FIELD => "0".to_string(),
        Filter::Absent(field) => {
            params.push(SqlValue::Text(json_path(field)?));
            "json_type(body, ?) IS NULL".to_string()
        }
        Filter::And(parts) => join(parts, " AND ", "1", params)?,
        Filter::Or(parts) => join(parts, " OR ", "0", params)?,
    };
    Ok(sql)
}

fn join(parts: &[Filter], separator: &str, empty: &str, params: &mut Vec<SqlValue>) -> Result<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let compiled = parts
        .iter()
        .map(|part| compile_into(part, params).map(|sql| format!("({sql})")))
        .collect::<Result<Vec<_>>>()?;
    Ok(compiled.join(separator))
}

fn compile_eq(field: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    if field == ID_FIELD {
        return Ok(match value {
            Value::String(id) => {
                params.push(SqlValue::Text(id.clone()));
                "id = ?".to_string()
            }
            _ => "0".to_string(),
        });
    }

    if field == VERSION_FIELD {
        return Ok(match value.as_u64().and_then(|v| i64::try_from(v).ok()) {
            Some(version) => {
                params.push(SqlValue::Integer(version));
                "COALESCE(version, 0) = ?".to_string()
            }
            None => "0".to_string(),
        });
    }

    let path = json_path(field)?;
    let sql = match value {
        Value::Null => {
            params.push(SqlValue::Text(path));
            "json_type(body, ?) = 'null'".to_string()
        }
        Value::Bool(flag) => {
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Text(if *flag { "true" } else { "false" }.to_string()));
            "json_type(body, ?) = ?".to_string()
        }
        Value::Number(number) => {
            params.push(SqlValue::Text(path));
            match number.as_i64() {
                Some(int) => params.push(SqlValue::Integer(int)),
                None => params.push(SqlValue::Real(number.as_f64().unwrap_or(f64::NAN))),
            }
            "json_extract(body, ?) = ?".to_string()
        }
        Value::String(text) => {
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Text(text.clone()));
            "(json_type(body, ?) = 'text' AND json_extract(body, ?) = ?)".to_string()
        }
        Value::Array(_) | Value::Object(_) => {
            params.push(SqlValue::Text(path));
            params.push(SqlValue::Text(serde_json::to_string(value)?));
            "json_extract(body, ?) = json(?)".to_string()
        }
    };
    Ok(sql)
}

/// JSON path for a top-level key.
fn json_path(field: &str) -> Result<String> {
    if field.is_empty() || field.contains('"') || field.contains('\\') {
        return Err(MigrateError::InvalidFilter(format!(
            "Unsupported field name: {field:?}"
        )));
    }
    Ok(format!("$.\"{field}\""))
}
