mod accounts;
mod chart;
mod csv;
mod db;
mod errors;
mod events;
mod models;
mod palette;
mod policy;
mod query;
mod redaction;
mod schema;
mod table_data;
mod workbench;

pub use crate::accounts::{classify_grants, grant_statements, AccountAdmin};
pub use crate::chart::{ChartSession, LineAdded, SeriesSource};
pub use crate::db::{open_backend, Backend, Dialect, ResultSet, Row, SqlValue};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    Account, AddColumnPayload, AddDataResponse, AddLinePayload, AppSettings, ArchiveResponse,
    AssignPrivilegePayload, Axis, BooleanResponse, Column, ColumnDataType, ColumnType, Conjunction,
    ConstraintPayload, CreateAccountPayload, Credentials, Driver, EventEnvelope, ExportRequest, ExportResponse,
    LineId, LoginResponse, Point, Privilege, RenderedLine, Scale, SortOrder, WorkbenchEvent,
};
pub use crate::palette::{Color, ColorPool, CATEGORY10};
pub use crate::policy::Action;
pub use crate::query::{BoundIssue, BoundValidity, ConstraintSet, DataQuery, ExportQuery, RangeBounds};
pub use crate::redaction::redact_sql;
pub use crate::schema::{SchemaBrowser, SchemaSource};
pub use crate::workbench::Workbench;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Client-facing entry points. Every command returns a plain error string and
/// reports the failure to subscribers as a notification.
pub struct AppState {
    workbench: Mutex<Workbench>,
}

impl AppState {
    pub fn new(settings: AppSettings) -> Result<Self, String> {
        let workbench = Workbench::new(settings).map_err(to_client_error)?;
        Ok(Self {
            workbench: Mutex::new(workbench),
        })
    }

    fn workbench(&self) -> MutexGuard<'_, Workbench> {
        match self.workbench.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn run<T>(&self, command: &str, call: impl FnOnce(&mut Workbench) -> AppResult<T>) -> Result<T, String> {
        let mut workbench = self.workbench();
        call(&mut workbench).map_err(|error| {
            warn!(command, remote = error.is_remote(), error = %error, "command failed");
            workbench.notify(command, &error.to_string());
            to_client_error(error)
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EventEnvelope> {
        self.workbench().subscribe()
    }

    pub fn get_settings(&self) -> AppSettings {
        self.workbench().settings().clone()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> Result<AppSettings, String> {
        self.run("update_settings", |workbench| workbench.update_settings(update))
    }

    pub fn login(&self, credentials: Credentials) -> Result<LoginResponse, String> {
        self.run("login", |workbench| workbench.connect(credentials))
    }

    pub fn logout(&self) -> BooleanResponse {
        self.workbench().disconnect();
        BooleanResponse { success: true }
    }

    pub fn allowed_actions(&self) -> Vec<Action> {
        self.workbench().allowed_actions()
    }

    pub fn list_tables(&self) -> Result<Vec<String>, String> {
        self.run("list_tables", |workbench| workbench.refresh_tables())
    }

    pub fn list_columns(&self, table: String) -> Result<Vec<Column>, String> {
        self.run("list_columns", |workbench| workbench.select_table(&table))
    }

    pub fn check_bounds(
        &self,
        table: String,
        column: String,
        min: Option<String>,
        max: Option<String>,
    ) -> Result<BoundValidity, String> {
        self.run("check_bounds", |workbench| {
            workbench.check_bounds(&table, &column, min.as_deref(), max.as_deref())
        })
    }

    pub fn add_line(&self, payload: AddLinePayload) -> Result<RenderedLine, String> {
        self.run("add_line", |workbench| workbench.add_line(payload))
    }

    pub fn remove_line(&self, id: LineId) -> Result<BooleanResponse, String> {
        self.run("remove_line", |workbench| workbench.remove_line(&id))?;
        Ok(BooleanResponse { success: true })
    }

    pub fn set_axis_scale(&self, axis: Axis, scale: Scale) -> Vec<RenderedLine> {
        self.workbench().set_axis_scale(axis, scale)
    }

    pub fn set_line_visible(&self, id: LineId, visible: bool) -> Result<RenderedLine, String> {
        self.run("set_line_visible", |workbench| workbench.set_line_visible(&id, visible))
    }

    pub fn list_lines(&self) -> Vec<RenderedLine> {
        self.workbench().lines()
    }

    pub fn clear_chart(&self) -> BooleanResponse {
        self.workbench().clear_chart();
        BooleanResponse { success: true }
    }

    pub fn add_rows(&self, table: String, rows: Vec<Vec<Option<String>>>) -> Result<AddDataResponse, String> {
        self.run("add_rows", |workbench| workbench.add_rows(&table, &rows))
    }

    pub fn import_csv(&self, table: String, path: String) -> Result<AddDataResponse, String> {
        self.run("import_csv", |workbench| workbench.import_csv_file(&table, Path::new(&path)))
    }

    /// `None` when no rows match; nothing is written in that case.
    pub fn export_csv(&self, request: ExportRequest, path: String) -> Result<Option<ExportResponse>, String> {
        self.run("export_csv", |workbench| workbench.export_to_file(&request, Path::new(&path)))
    }

    pub fn archive(&self, request: ExportRequest, path: String) -> Result<ArchiveResponse, String> {
        self.run("archive", |workbench| workbench.archive(&request, Path::new(&path)))
    }

    pub fn add_column(&self, payload: AddColumnPayload) -> Result<Vec<Column>, String> {
        self.run("add_column", |workbench| workbench.add_column(&payload))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, String> {
        self.run("list_accounts", |workbench| workbench.list_accounts())
    }

    pub fn create_account(&self, payload: CreateAccountPayload) -> Result<Account, String> {
        self.run("create_account", |workbench| workbench.create_account(&payload))
    }

    pub fn assign_privilege(&self, payload: AssignPrivilegePayload) -> Result<Account, String> {
        self.run("assign_privilege", |workbench| workbench.assign_privilege(&payload))
    }

    pub fn delete_account(&self, host: String, user: String) -> Result<BooleanResponse, String> {
        self.run("delete_account", |workbench| workbench.delete_account(&host, &user))?;
        Ok(BooleanResponse { success: true })
    }

    pub fn open_in_viewer(&self, path: String) -> Result<BooleanResponse, String> {
        self.run("open_in_viewer", |workbench| workbench.open_with_viewer(Path::new(&path)))?;
        Ok(BooleanResponse { success: true })
    }
}

/// Installs the JSON file logger under `log_dir`. Later calls are rejected by
/// the subscriber registry and return an error.
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "workbench.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
