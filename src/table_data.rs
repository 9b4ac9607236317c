use crate::csv::format_export;
use crate::db::{Backend, Row, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::models::{AddColumnPayload, Column, ColumnType, ExportRequest};
use crate::query::{add_column_sql, convert_entered_value, insert_request, ConstraintSet, ExportQuery};
use tracing::{debug, info, warn};

/// Result of inserting entered rows. Rows before a failure stay inserted.
#[derive(Debug)]
pub struct InsertOutcome {
    pub records: Vec<Row>,
    pub failure: Option<(usize, AppError)>,
}

impl InsertOutcome {
    pub fn inserted(&self) -> usize {
        self.records.len()
    }
}

/// Inserts rows of entered text, one statement per row naming only the
/// columns that carry a value. Stops at the first failing row.
pub fn insert_rows(
    backend: &dyn Backend,
    table: &str,
    columns: &[Column],
    rows: &[Vec<Option<String>>],
) -> InsertOutcome {
    let mut outcome = InsertOutcome {
        records: Vec::new(),
        failure: None,
    };

    for (index, cells) in rows.iter().enumerate() {
        match insert_row(backend, table, columns, cells) {
            Ok(Some(record)) => outcome.records.push(record),
            Ok(None) => debug!(table, row = index, "skipping empty row"),
            Err(error) => {
                warn!(table, row = index, error = %error, "row insert failed");
                outcome.failure = Some((index, error));
                break;
            }
        }
    }

    info!(table, rows = outcome.inserted(), failed = outcome.failure.is_some(), "rows inserted");
    outcome
}

fn insert_row(backend: &dyn Backend, table: &str, columns: &[Column], cells: &[Option<String>]) -> AppResult<Option<Row>> {
    if cells.len() > columns.len() {
        return Err(AppError::Validation(format!(
            "row has {} values but {} has {} columns",
            cells.len(),
            table,
            columns.len()
        )));
    }

    let mut values = Vec::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let value = match cells.get(index).and_then(Option::as_deref) {
            Some(text) => convert_entered_value(&column.name, column.column_type, text)?,
            None => SqlValue::Null,
        };
        values.push((column.name.clone(), value));
    }

    let Some(request) = insert_request(backend.dialect(), table, &values) else {
        return Ok(None);
    };
    backend.execute(&request.sql, &request.params)?;
    Ok(Some(values.into_iter().collect()))
}

/// Builds an export query, typing each constraint by its column.
pub fn export_query(
    request: &ExportRequest,
    mut column_type: impl FnMut(&str) -> AppResult<Option<ColumnType>>,
) -> AppResult<ExportQuery> {
    if request.table.trim().is_empty() {
        return Err(AppError::Validation("table is required".to_string()));
    }
    let mut constraints = ConstraintSet::new();
    for constraint in &request.constraints {
        let Some(kind) = column_type(&constraint.column)? else {
            return Err(AppError::Validation(format!(
                "{} has no values to filter on",
                constraint.column
            )));
        };
        constraints.add(
            &constraint.column,
            kind,
            constraint.min.as_deref(),
            constraint.max.as_deref(),
            constraint.conjunction,
        )?;
    }
    Ok(ExportQuery {
        table: request.table.clone(),
        constraints,
        sort_by: request.sort_by.clone(),
        order: request.order,
    })
}

/// CSV text of the selected rows, or `None` when nothing matches.
pub fn export(backend: &dyn Backend, query: &ExportQuery) -> AppResult<Option<String>> {
    let request = query.select_request(backend.dialect());
    debug!(sql = %request.sql, params = request.params.len(), "exporting");
    let result = backend.query(&request.sql, &request.params)?;
    let rows = result.len();
    let text = format_export(&result);
    info!(table = %query.table, rows, "export built");
    Ok(text)
}

/// Deletes the rows `query` selects; the whole table when unconstrained.
pub fn delete_matching(backend: &dyn Backend, query: &ExportQuery) -> AppResult<u64> {
    let request = query.delete_request(backend.dialect());
    debug!(sql = %request.sql, params = request.params.len(), "deleting");
    let deleted = backend.execute(&request.sql, &request.params)?;
    info!(table = %query.table, rows = deleted, "rows deleted");
    Ok(deleted)
}

pub fn add_column(backend: &dyn Backend, payload: &AddColumnPayload) -> AppResult<()> {
    let sql = add_column_sql(
        backend.dialect(),
        &payload.table,
        &payload.column,
        payload.data_type,
        payload.length,
    )?;
    debug!(sql = %sql, "adding column");
    backend.execute(&sql, &[])?;
    info!(table = %payload.table, column = %payload.column, data_type = payload.data_type.as_sql(), "column added");
    Ok(())
}
