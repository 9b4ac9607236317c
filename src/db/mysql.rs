use super::{Backend, Dialect, ResultSet, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::models::Credentials;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use std::future::Future;

const DEFAULT_PORT: u16 = 3306;

/// MySQL server reached through sqlx. Every call opens its own connection on a
/// throwaway current-thread runtime and closes it before returning.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    options: MySqlConnectOptions,
    target: String,
}

impl MySqlBackend {
    pub fn new(credentials: &Credentials) -> Self {
        let port = credentials.port.unwrap_or(DEFAULT_PORT);
        let options = MySqlConnectOptions::new()
            .host(&credentials.server)
            .port(port)
            .username(&credentials.user)
            .password(&credentials.password)
            .database(&credentials.database);
        Self {
            options,
            target: format!("mysql://{}@{}:{}/{}", credentials.user, credentials.server, port, credentials.database),
        }
    }

    /// Drives `future` on a private runtime. Callers must not already be on a
    /// tokio runtime thread; that case is reported instead of panicking.
    fn block_on<T, F>(&self, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AppError::Internal(
                "database calls are blocking; run them outside the async runtime (e.g. spawn_blocking)".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| AppError::Internal(format!("failed to start database runtime: {}", error)))?;
        runtime.block_on(future)
    }

    async fn connect(&self) -> AppResult<MySqlConnection> {
        MySqlConnection::connect_with(&self.options)
            .await
            .map_err(|error| AppError::Connection(format!("{}: {}", self.target, error)))
    }
}

fn bind_value<'q>(query: Query<'q, MySql, MySqlArguments>, value: &SqlValue) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Integer(value) => query.bind(*value),
        SqlValue::Real(value) => query.bind(*value),
        SqlValue::Text(value) => query.bind(value.clone()),
        SqlValue::Timestamp(value) => query.bind(*value),
    }
}

fn decode_value(row: &MySqlRow, index: usize) -> AppResult<SqlValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    let value = if type_name.starts_with("FLOAT") {
        SqlValue::Real(row.try_get_unchecked::<f32, _>(index)? as f64)
    } else if type_name.starts_with("DOUBLE") {
        SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?)
    } else if type_name.starts_with("DECIMAL") {
        let text = row.try_get_unchecked::<String, _>(index)?;
        match text.trim().parse::<f64>() {
            Ok(number) => SqlValue::Real(number),
            Err(_) => SqlValue::Text(text),
        }
    } else if type_name.contains("INT") || type_name == "YEAR" || type_name == "BOOLEAN" {
        SqlValue::Integer(row.try_get_unchecked::<i64, _>(index)?)
    } else if type_name == "DATETIME" || type_name == "TIMESTAMP" {
        SqlValue::Timestamp(row.try_get_unchecked::<NaiveDateTime, _>(index)?)
    } else if type_name == "DATE" {
        let date = row.try_get_unchecked::<NaiveDate, _>(index)?;
        SqlValue::Timestamp(date.and_hms_opt(0, 0, 0).unwrap_or_default())
    } else {
        match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    };
    Ok(value)
}

fn to_result_set(rows: Vec<MySqlRow>) -> AppResult<ResultSet> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
        .unwrap_or_default();

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..row.columns().len() {
            values.push(decode_value(row, index)?);
        }
        result.push(values);
    }
    Ok(ResultSet { columns, rows: result })
}

async fn fetch(conn: &mut MySqlConnection, sql: &str, params: &[SqlValue]) -> AppResult<ResultSet> {
    let rows = if params.is_empty() {
        // Text protocol: administrative SHOW statements are not all preparable.
        sqlx::raw_sql(sql).fetch_all(&mut *conn).await?
    } else {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        query.fetch_all(&mut *conn).await?
    };
    to_result_set(rows)
}

async fn run(conn: &mut MySqlConnection, sql: &str, params: &[SqlValue]) -> AppResult<u64> {
    let outcome = if params.is_empty() {
        sqlx::raw_sql(sql).execute(&mut *conn).await?
    } else {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        query.execute(&mut *conn).await?
    };
    Ok(outcome.rows_affected())
}

impl Backend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn describe(&self) -> String {
        self.target.clone()
    }

    fn ping(&self) -> AppResult<()> {
        self.block_on(async {
            let mut conn = self.connect().await?;
            let outcome = conn
                .ping()
                .await
                .map_err(|error| AppError::Connection(format!("{}: {}", self.target, error)));
            let _ = conn.close().await;
            outcome
        })
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> AppResult<ResultSet> {
        self.block_on(async {
            let mut conn = self.connect().await?;
            let outcome = fetch(&mut conn, sql, params).await;
            let _ = conn.close().await;
            outcome
        })
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AppResult<u64> {
        self.block_on(async {
            let mut conn = self.connect().await?;
            let outcome = run(&mut conn, sql, params).await;
            let _ = conn.close().await;
            outcome
        })
    }

    fn execute_batch(&self, statements: &[String]) -> AppResult<()> {
        self.block_on(async {
            let mut conn = self.connect().await?;
            let mut outcome = Ok(());
            for statement in statements {
                if let Err(error) = run(&mut conn, statement, &[]).await {
                    outcome = Err(error);
                    break;
                }
            }
            let _ = conn.close().await;
            outcome
        })
    }
}
