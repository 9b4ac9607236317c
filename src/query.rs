//! Request construction for plotting, export, archive and data entry.
//!
//! Nothing here touches a database. Identifiers are quoted per dialect and
//! every user-supplied value travels as a bound parameter.

use crate::db::{Dialect, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::models::{ColumnDataType, ColumnType, Conjunction, SortOrder};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const MAX_VARCHAR_LENGTH: u32 = 255;

const ENTERED_DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

const ENTERED_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

const STORED_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Lenient parse for user-entered date/time text.
pub fn parse_timestamp_text(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ENTERED_DATETIME_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(value);
        }
    }
    for format in ENTERED_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    DateTime::parse_from_rfc3339(trimmed).ok().map(|value| value.naive_local())
}

/// Strict parse for values read back from storage, so free text that merely
/// contains a date is not mistaken for a timestamp.
pub fn parse_stored_timestamp(text: &str) -> Option<NaiveDateTime> {
    for format in STORED_DATETIME_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value);
        }
    }
    if text.len() == 10 {
        return NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0));
    }
    None
}

/// Parses a number, ignoring thousands separators.
pub fn parse_numeric_text(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue {
    Numeric(f64),
    Timestamp(NaiveDateTime),
}

impl BoundValue {
    pub fn parse(column_type: ColumnType, text: &str) -> Option<Self> {
        match column_type {
            ColumnType::Numeric => parse_numeric_text(text).map(Self::Numeric),
            ColumnType::Timestamp => parse_timestamp_text(text).map(Self::Timestamp),
            ColumnType::Text => None,
        }
    }

    pub fn to_sql_value(self) -> SqlValue {
        match self {
            Self::Numeric(value) => SqlValue::Real(value),
            Self::Timestamp(value) => SqlValue::Text(format_timestamp(&value)),
        }
    }

    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Numeric(left), Self::Numeric(right)) => left.partial_cmp(right),
            (Self::Timestamp(left), Self::Timestamp(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundIssue {
    TextColumn,
    InvalidMin,
    InvalidMax,
    MinNotBelowMax,
}

impl fmt::Display for BoundIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::TextColumn => "cannot filter a text column by range",
            Self::InvalidMin => "min bound is invalid",
            Self::InvalidMax => "max bound is invalid",
            Self::MinNotBelowMax => "min bound must be below max bound (min >= max)",
        };
        f.write_str(message)
    }
}

/// Field-level validity of a pair of bound inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundValidity {
    pub filterable: bool,
    pub min_valid: bool,
    pub max_valid: bool,
    pub ordered: bool,
}

impl BoundValidity {
    pub fn is_valid(&self) -> bool {
        self.issue().is_none()
    }

    pub fn issue(&self) -> Option<BoundIssue> {
        if !self.filterable {
            Some(BoundIssue::TextColumn)
        } else if !self.min_valid {
            Some(BoundIssue::InvalidMin)
        } else if !self.max_valid {
            Some(BoundIssue::InvalidMax)
        } else if !self.ordered {
            Some(BoundIssue::MinNotBelowMax)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeBounds {
    pub min: Option<BoundValue>,
    pub max: Option<BoundValue>,
}

impl RangeBounds {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Checks bound text against the column type without raising.
    pub fn check(column_type: ColumnType, min: Option<&str>, max: Option<&str>) -> (BoundValidity, RangeBounds) {
        let min_text = non_blank(min);
        let max_text = non_blank(max);

        if column_type == ColumnType::Text && (min_text.is_some() || max_text.is_some()) {
            let validity = BoundValidity {
                filterable: false,
                min_valid: true,
                max_valid: true,
                ordered: true,
            };
            return (validity, RangeBounds::default());
        }

        let parsed_min = min_text.map(|text| BoundValue::parse(column_type, text));
        let parsed_max = max_text.map(|text| BoundValue::parse(column_type, text));
        let min_valid = !matches!(parsed_min, Some(None));
        let max_valid = !matches!(parsed_max, Some(None));
        let bounds = RangeBounds {
            min: parsed_min.flatten(),
            max: parsed_max.flatten(),
        };
        let ordered = match (&bounds.min, &bounds.max) {
            (Some(low), Some(high)) => low.compare(high) == Some(Ordering::Less),
            _ => true,
        };

        let validity = BoundValidity {
            filterable: true,
            min_valid,
            max_valid,
            ordered,
        };
        (validity, bounds)
    }

    pub fn parse(column_type: ColumnType, min: Option<&str>, max: Option<&str>) -> AppResult<RangeBounds> {
        let (validity, bounds) = Self::check(column_type, min, max);
        match validity.issue() {
            Some(issue) => Err(AppError::Validation(issue.to_string())),
            None => Ok(bounds),
        }
    }

    /// `column >= ? AND column < ?` for whichever bounds are present.
    fn predicate(&self, quoted_column: &str, params: &mut Vec<SqlValue>) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(min) = self.min {
            parts.push(format!("{} >= ?", quoted_column));
            params.push(min.to_sql_value());
        }
        if let Some(max) = self.max {
            parts.push(format!("{} < ?", quoted_column));
            params.push(max.to_sql_value());
        }
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(format!("({})", parts.join(" AND "))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlRequest {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// The row fetch behind one plotted line.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    pub table: String,
    pub x_column: String,
    pub y_column: String,
    pub x_type: ColumnType,
    pub bounds: RangeBounds,
}

impl DataQuery {
    pub fn build(
        table: &str,
        x_column: &str,
        y_column: &str,
        x_type: ColumnType,
        min: Option<&str>,
        max: Option<&str>,
    ) -> AppResult<Self> {
        if table.trim().is_empty() || x_column.trim().is_empty() || y_column.trim().is_empty() {
            return Err(AppError::Validation("table, x column and y column are required".to_string()));
        }
        let bounds = RangeBounds::parse(x_type, min, max)?;
        Ok(Self {
            table: table.to_string(),
            x_column: x_column.to_string(),
            y_column: y_column.to_string(),
            x_type,
            bounds,
        })
    }

    pub fn to_request(&self, dialect: Dialect) -> SqlRequest {
        let x = dialect.quote_ident(&self.x_column);
        let y = dialect.quote_ident(&self.y_column);
        let mut sql = format!("SELECT {}, {} FROM {}", x, y, dialect.quote_ident(&self.table));
        let mut params = Vec::new();
        if let Some(predicate) = self.bounds.predicate(&x, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql.push_str(&format!(" ORDER BY {} ASC", x));
        SqlRequest { sql, params }
    }
}

/// One non-null value of `column`, used to infer its type.
pub fn sample_sql(dialect: Dialect, table: &str, column: &str) -> String {
    let quoted = dialect.quote_ident(column);
    format!(
        "SELECT {} FROM {} WHERE {} IS NOT NULL LIMIT 1",
        quoted,
        dialect.quote_ident(table),
        quoted
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: String,
    pub bounds: RangeBounds,
    pub conjunction: Option<Conjunction>,
}

/// Ordered filter list for export and archive; one entry per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Constraint] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn add(
        &mut self,
        column: &str,
        column_type: ColumnType,
        min: Option<&str>,
        max: Option<&str>,
        conjunction: Option<Conjunction>,
    ) -> AppResult<()> {
        if self.items.iter().any(|item| item.column == column) {
            return Err(AppError::Duplicate(format!("constraint already exists for column {}", column)));
        }
        let bounds = RangeBounds::parse(column_type, min, max)?;
        if bounds.is_unbounded() {
            return Err(AppError::Validation(format!("constraint on {} needs a min or max bound", column)));
        }
        let conjunction = if self.items.is_empty() {
            None
        } else {
            Some(conjunction.ok_or_else(|| {
                AppError::Validation(format!("constraint on {} needs AND or OR", column))
            })?)
        };
        self.items.push(Constraint {
            column: column.to_string(),
            bounds,
            conjunction,
        });
        Ok(())
    }

    pub fn remove(&mut self, column: &str) -> bool {
        let Some(index) = self.items.iter().position(|item| item.column == column) else {
            return false;
        };
        self.items.remove(index);
        if index == 0 {
            if let Some(first) = self.items.first_mut() {
                first.conjunction = None;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn where_clause(&self, dialect: Dialect, params: &mut Vec<SqlValue>) -> Option<String> {
        let mut clause = String::new();
        for item in &self.items {
            let Some(predicate) = item.bounds.predicate(&dialect.quote_ident(&item.column), params) else {
                continue;
            };
            if !clause.is_empty() {
                let joiner = item.conjunction.unwrap_or(Conjunction::And);
                clause.push(' ');
                clause.push_str(joiner.as_sql());
                clause.push(' ');
            }
            clause.push_str(&predicate);
        }
        if clause.is_empty() {
            None
        } else {
            Some(clause)
        }
    }
}

/// `SELECT *` with filters and optional sort, as used by export and archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportQuery {
    pub table: String,
    pub constraints: ConstraintSet,
    pub sort_by: Option<String>,
    pub order: Option<SortOrder>,
}

impl ExportQuery {
    pub fn select_request(&self, dialect: Dialect) -> SqlRequest {
        let mut sql = format!("SELECT * FROM {}", dialect.quote_ident(&self.table));
        let mut params = Vec::new();
        if let Some(clause) = self.constraints.where_clause(dialect, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        if let Some(sort_by) = self.sort_by.as_deref().filter(|value| !value.trim().is_empty()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(&dialect.quote_ident(sort_by));
            if let Some(order) = self.order {
                sql.push(' ');
                sql.push_str(order.as_sql());
            }
        }
        SqlRequest { sql, params }
    }

    /// Deletes what `select_request` selects; truncates when unfiltered.
    pub fn delete_request(&self, dialect: Dialect) -> SqlRequest {
        let mut params = Vec::new();
        match self.constraints.where_clause(dialect, &mut params) {
            Some(clause) => SqlRequest {
                sql: format!("DELETE FROM {} WHERE {}", dialect.quote_ident(&self.table), clause),
                params,
            },
            None => SqlRequest {
                sql: dialect.truncate_sql(&self.table),
                params,
            },
        }
    }
}

/// Converts one cell of entered text for insertion. Blank means null.
pub fn convert_entered_value(column: &str, column_type: Option<ColumnType>, text: &str) -> AppResult<SqlValue> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return Ok(SqlValue::Null);
    }
    match column_type {
        Some(ColumnType::Timestamp) => parse_timestamp_text(trimmed)
            .map(SqlValue::Timestamp)
            .ok_or_else(|| AppError::Validation(format!("'{}' is not a valid date/time for {}", trimmed, column))),
        Some(ColumnType::Numeric) => {
            let cleaned: String = trimmed.chars().filter(|c| *c != ',').collect();
            if let Ok(integer) = cleaned.parse::<i64>() {
                return Ok(SqlValue::Integer(integer));
            }
            parse_numeric_text(&cleaned)
                .map(SqlValue::Real)
                .ok_or_else(|| AppError::Validation(format!("'{}' is not a valid number for {}", trimmed, column)))
        }
        Some(ColumnType::Text) | None => Ok(SqlValue::Text(trimmed.to_string())),
    }
}

/// `INSERT` naming only the columns that carry a value. `None` when the row
/// is entirely null.
pub fn insert_request(dialect: Dialect, table: &str, values: &[(String, SqlValue)]) -> Option<SqlRequest> {
    let entered: Vec<&(String, SqlValue)> = values.iter().filter(|(_, value)| !value.is_null()).collect();
    if entered.is_empty() {
        return None;
    }
    let columns = entered
        .iter()
        .map(|(column, _)| dialect.quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; entered.len()].join(", ");
    Some(SqlRequest {
        sql: format!("INSERT INTO {} ({}) VALUES ({})", dialect.quote_ident(table), columns, placeholders),
        params: entered.into_iter().map(|(_, value)| value.clone()).collect(),
    })
}

pub fn add_column_sql(
    dialect: Dialect,
    table: &str,
    column: &str,
    data_type: ColumnDataType,
    length: Option<u32>,
) -> AppResult<String> {
    if column.trim().is_empty() {
        return Err(AppError::Validation("column name is required".to_string()));
    }
    let type_sql = match (data_type, length) {
        (ColumnDataType::Varchar, Some(length)) if (1..=MAX_VARCHAR_LENGTH).contains(&length) => {
            format!("VARCHAR({})", length)
        }
        (ColumnDataType::Varchar, Some(length)) => {
            return Err(AppError::Validation(format!(
                "VARCHAR length must be between 1 and {}, got {}",
                MAX_VARCHAR_LENGTH, length
            )))
        }
        (ColumnDataType::Varchar, None) => {
            return Err(AppError::Validation("VARCHAR columns need a length".to_string()))
        }
        (other, None) => other.as_sql().to_string(),
        (other, Some(_)) => {
            return Err(AppError::Validation(format!("{} columns do not take a length", other.as_sql())))
        }
    };
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        dialect.quote_ident(table),
        dialect.quote_ident(column.trim()),
        type_sql
    ))
}
