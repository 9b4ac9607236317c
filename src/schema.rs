use crate::chart::SeriesSource;
use crate::db::{Backend, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::models::{Column, ColumnType, Point};
use crate::query::{sample_sql, DataQuery};
use std::collections::HashMap;
use tracing::{debug, info};

/// Table list, the selected table's columns, and inferred column types.
#[derive(Debug, Default, Clone)]
pub struct SchemaBrowser {
    tables: Vec<String>,
    selected: Option<String>,
    columns: Vec<Column>,
    types: HashMap<(String, String), Option<ColumnType>>,
}

impl SchemaBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn selected_table(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|name| name == table)
    }

    pub fn reset(&mut self) {
        self.tables.clear();
        self.selected = None;
        self.columns.clear();
        self.types.clear();
    }

    pub fn load_tables(&mut self, backend: &dyn Backend) -> AppResult<Vec<String>> {
        let result = backend.query(backend.dialect().list_tables_sql(), &[])?;
        self.tables = result.first_column_strings();
        info!(tables = self.tables.len(), "tables loaded");
        Ok(self.tables.clone())
    }

    /// Selects `table` and replaces the column cache with its columns. The
    /// previous table's columns are dropped even if listing fails.
    pub fn list_columns(&mut self, backend: &dyn Backend, table: &str) -> AppResult<Vec<Column>> {
        self.selected = None;
        self.columns.clear();
        if !self.has_table(table) {
            return Err(AppError::NotFound(format!("table {} does not exist", table)));
        }

        let result = backend.query(
            backend.dialect().list_columns_sql(),
            &[SqlValue::Text(table.to_string())],
        )?;
        let mut columns = Vec::with_capacity(result.len());
        for name in result.first_column_strings() {
            let column_type = self.column_type(backend, table, &name)?;
            columns.push(Column { name, column_type });
        }

        debug!(table, columns = columns.len(), "columns loaded");
        self.selected = Some(table.to_string());
        self.columns = columns.clone();
        Ok(columns)
    }

    /// Infers the type of `column` from one non-null sample, once per column.
    pub fn column_type(&mut self, backend: &dyn Backend, table: &str, column: &str) -> AppResult<Option<ColumnType>> {
        let key = (table.to_string(), column.to_string());
        if let Some(cached) = self.types.get(&key) {
            return Ok(*cached);
        }
        let sample = backend.query(&sample_sql(backend.dialect(), table, column), &[])?;
        let column_type = sample
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::column_type);
        self.types.insert(key, column_type);
        Ok(column_type)
    }

    /// Forgets inferred types for `table`, e.g. after rows were added to it.
    /// Selected columns that had no type are sampled again by `refresh_columns`.
    pub fn invalidate_table(&mut self, table: &str) {
        self.types.retain(|(cached_table, _), _| cached_table != table);
    }

    /// Columns of `table`, selecting it if needed. Columns still lacking a
    /// type are re-inferred, so rows added since the last sample count.
    pub fn refresh_columns(&mut self, backend: &dyn Backend, table: &str) -> AppResult<Vec<Column>> {
        if self.selected.as_deref() != Some(table) {
            return self.list_columns(backend, table);
        }
        let mut columns = self.columns.clone();
        for column in columns.iter_mut().filter(|column| column.column_type.is_none()) {
            column.column_type = self.column_type(backend, table, &column.name)?;
        }
        self.columns = columns.clone();
        Ok(columns)
    }

    pub fn fetch_points(&self, backend: &dyn Backend, query: &DataQuery, y_type: ColumnType) -> AppResult<Vec<Point>> {
        let request = query.to_request(backend.dialect());
        debug!(sql = %request.sql, params = request.params.len(), "fetching points");
        let result = backend.query(&request.sql, &request.params)?;

        let mut points = Vec::with_capacity(result.len());
        let mut skipped = 0usize;
        for row in &result.rows {
            let (Some(x), Some(y)) = (row.first(), row.get(1)) else {
                skipped += 1;
                continue;
            };
            match (x.to_plot_value(query.x_type), y.to_plot_value(y_type)) {
                (Some(x), Some(y)) => points.push(Point::new(x, y)),
                _ => skipped += 1,
            }
        }
        debug!(rows = result.len(), points = points.len(), skipped, "points fetched");
        Ok(points)
    }
}

/// A schema browser bound to a live backend, as seen by the chart session.
pub struct SchemaSource<'a> {
    pub backend: &'a dyn Backend,
    pub browser: &'a mut SchemaBrowser,
}

impl SeriesSource for SchemaSource<'_> {
    fn column_type(&mut self, table: &str, column: &str) -> AppResult<Option<ColumnType>> {
        self.browser.column_type(self.backend, table, column)
    }

    fn fetch_points(&mut self, query: &DataQuery, y_type: ColumnType) -> AppResult<Vec<Point>> {
        self.browser.fetch_points(self.backend, query, y_type)
    }
}
