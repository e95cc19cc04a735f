//! Ad-hoc SQL outside the typed `users` queries.
//!
//! Statements use named placeholders (`:user_id`). They are rewritten to
//! positional `$n` parameters and every value is sent as a bind parameter,
//! never spliced into the statement text.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgRow, PgValueFormat, PgValueRef};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;
use uuid::Uuid;

use super::{DbError, Session};

/// One result row: column name to JSON value, in column order.
pub type RawRow = Map<String, Value>;

/// A value bound to a named placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(i64::from(v))
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlParam::Null, Into::into)
    }
}

/// Values for the named placeholders of one statement.
#[derive(Debug, Clone, Default)]
pub struct NamedParams {
    values: BTreeMap<String, SqlParam>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    fn get(&self, name: &str) -> Option<&SqlParam> {
        self.values.get(name)
    }
}

/// Runs `query` inside `session`, binding `params` by name, and returns every row as JSON.
pub async fn execute_raw(
    session: &mut Session,
    query: &str,
    params: &NamedParams,
) -> Result<Vec<RawRow>, DbError> {
    let rewritten = rewrite_named(query);
    debug!(
        query = %rewritten.sql,
        params = ?rewritten.names,
        "Executing raw query"
    );

    let mut stmt = sqlx::query(&rewritten.sql);
    for name in &rewritten.names {
        let param = params
            .get(name)
            .ok_or_else(|| DbError::MissingParam(name.clone()))?;
        stmt = match param {
            SqlParam::Null => stmt.bind(None::<String>),
            SqlParam::Bool(v) => stmt.bind(*v),
            SqlParam::Int(v) => stmt.bind(*v),
            SqlParam::Float(v) => stmt.bind(*v),
            SqlParam::Text(v) => stmt.bind(v.clone()),
        };
    }

    let rows = stmt.fetch_all(session.conn()).await?;
    rows.iter().map(row_to_json).collect()
}

/// Statement text with positional placeholders, plus the parameter name behind each `$n`.
#[derive(Debug, PartialEq)]
struct Rewritten {
    sql: String,
    names: Vec<String>,
}

/// Rewrites `:name` placeholders to `$1`, `$2`, ...
///
/// Casts (`::int`), quoted literals (including `E'...'` escape strings) and
/// identifiers, dollar-quoted bodies and comments pass through untouched. A name used twice maps to the same `$n`.
fn rewrite_named(query: &str) -> Rewritten {
    let chars: Vec<char> = query.chars().collect();
    let mut sql = String::with_capacity(query.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = skip_quoted(&chars, i, c);
                sql.extend(&chars[i..end]);
                i = end;
            }
            'e' | 'E'
                if chars.get(i + 1) == Some(&'\'')
                    && (i == 0 || !is_ident_char(chars[i - 1])) =>
            {
                let end = skip_escape_string(&chars, i + 1);
                sql.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                sql.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_seq(&chars, i + 2, &['*', '/']).map_or(chars.len(), |p| p + 2);
                sql.extend(&chars[i..end]);
                i = end;
            }
            '$' => {
                let end = match dollar_tag(&chars, i) {
                    Some(tag) => find_seq(&chars, i + tag.len(), &tag)
                        .map_or(chars.len(), |p| p + tag.len()),
                    None => i + 1,
                };
                sql.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                sql.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|&ch| is_ident_start(ch)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = match names.iter().position(|n| *n == name) {
                    Some(p) => p + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                sql.push('$');
                sql.push_str(&position.to_string());
                i = end;
            }
            _ => {
                sql.push(c);
                i += 1;
            }
        }
    }

    Rewritten { sql, names }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index just past the closing quote. Doubled quotes are part of the literal.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Like [`skip_quoted`] for `E'...'` literals, where a backslash escapes the next character.
fn skip_escape_string(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\'' if chars.get(i + 1) == Some(&'\'') => i += 2,
            '\'' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// `$tag$` or `$$` opening at `start`, if any. Positional `$1` is not a tag.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut i = start + 1;
    if chars.get(i).is_some_and(|&c| is_ident_start(c)) {
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
    }
    (chars.get(i) == Some(&'$')).then(|| chars[start..=i].to_vec())
}

fn find_seq(chars: &[char], from: usize, seq: &[char]) -> Option<usize> {
    if from > chars.len() {
        return None;
    }
    chars[from..]
        .windows(seq.len())
        .position(|w| w == seq)
        .map(|p| from + p)
}

fn row_to_json(row: &PgRow) -> Result<RawRow, DbError> {
    let mut out = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let ordinal = column.ordinal();
        let type_name = column.type_info().name();
        let raw = row.try_get_raw(ordinal)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            match type_name {
                "BOOL" => Value::from(row.try_get::<bool, _>(ordinal)?),
                "INT2" => Value::from(row.try_get::<i16, _>(ordinal)?),
                "INT4" => Value::from(row.try_get::<i32, _>(ordinal)?),
                "INT8" => Value::from(row.try_get::<i64, _>(ordinal)?),
                "FLOAT4" => Value::from(row.try_get::<f32, _>(ordinal)?),
                "FLOAT8" => Value::from(row.try_get::<f64, _>(ordinal)?),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                    Value::from(row.try_get::<String, _>(ordinal)?)
                }
                "JSON" | "JSONB" => row.try_get::<Value, _>(ordinal)?,
                "UUID" => Value::from(row.try_get::<Uuid, _>(ordinal)?.to_string()),
                "TIMESTAMPTZ" => {
                    Value::from(row.try_get::<DateTime<Utc>, _>(ordinal)?.to_rfc3339())
                }
                "TIMESTAMP" => {
                    Value::from(row.try_get::<NaiveDateTime, _>(ordinal)?.to_string())
                }
                "DATE" => Value::from(row.try_get::<NaiveDate, _>(ordinal)?.to_string()),
                "vector" => Value::from(decode_vector(raw).map_err(|reason| DbError::Decode {
                    column: column.name().to_string(),
                    type_name: type_name.to_string(),
                    reason,
                })?),
                other => {
                    return Err(DbError::Decode {
                        column: column.name().to_string(),
                        type_name: other.to_string(),
                        reason: "unsupported column type".to_string(),
                    })
                }
            }
        };

        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Decodes a pgvector value in either wire format.
fn decode_vector(raw: PgValueRef<'_>) -> Result<Vec<f32>, String> {
    match raw.format() {
        PgValueFormat::Binary => decode_vector_binary(raw.as_bytes().map_err(|e| e.to_string())?),
        PgValueFormat::Text => decode_vector_text(raw.as_str().map_err(|e| e.to_string())?),
    }
}

/// Binary layout: `u16` dimension, `u16` reserved, then big-endian `f32`s.
fn decode_vector_binary(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() < 4 {
        return Err(format!("vector header truncated ({} bytes)", bytes.len()));
    }
    let dim = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    let body = &bytes[4..];
    if body.len() != dim * 4 {
        return Err(format!(
            "vector of dimension {dim} needs {} bytes, got {}",
            dim * 4,
            body.len()
        ));
    }
    Ok(body
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_vector_text(text: &str) -> Result<Vec<f32>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("malformed vector literal '{text}'"))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| format!("bad vector component '{part}': {e}"))
        })
        .collect()
}
