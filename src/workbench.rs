use crate::accounts::{current_host, current_privilege, AccountAdmin};
use crate::chart::ChartSession;
use crate::csv::parse_import;
use crate::db::{open_backend, Backend};
use crate::errors::{AppError, AppResult};
use crate::events::EventBus;
use crate::models::{
    Account, AddColumnPayload, AddDataResponse, AddLinePayload, AppSettings, ArchiveResponse, Axis,
    AssignPrivilegePayload, Column, CreateAccountPayload, Credentials, EventEnvelope, ExportRequest,
    ExportResponse, LineId, LoginResponse, Privilege, RenderedLine, Scale, WorkbenchEvent,
};
use crate::palette::{parse_palette, ColorPool};
use crate::policy::{AccessPolicy, Action};
use crate::query::{BoundValidity, RangeBounds};
use crate::redaction::redact_sql;
use crate::schema::{SchemaBrowser, SchemaSource};
use crate::table_data;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Everything tied to one login. Dropped as a whole on disconnect.
pub struct SessionContext {
    pub credentials: Credentials,
    pub backend: Box<dyn Backend>,
    pub host: Option<String>,
    pub privilege: Privilege,
}

/// The non-GUI application: session, schema, chart, accounts and settings
/// behind one owner. Event fan-out goes through `EventBus`.
pub struct Workbench {
    session: Option<SessionContext>,
    schema: SchemaBrowser,
    chart: ChartSession,
    accounts: AccountAdmin,
    settings: AppSettings,
    policy: AccessPolicy,
    events: EventBus,
}

impl Workbench {
    pub fn new(settings: AppSettings) -> AppResult<Self> {
        let policy = AccessPolicy::new();
        policy.validate_settings(&settings)?;
        let chart = new_chart(&settings, "")?;
        Ok(Self {
            session: None,
            schema: SchemaBrowser::new(),
            chart,
            accounts: AccountAdmin::default(),
            settings,
            policy,
            events: EventBus::new(),
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn notify(&self, title: &str, message: &str) -> EventEnvelope {
        self.events.publish(WorkbenchEvent::Notification {
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Deep-merges a partial settings object. A new palette applies at once
    /// when nothing is plotted, otherwise after the chart is cleared.
    pub fn update_settings(&mut self, update: serde_json::Value) -> AppResult<AppSettings> {
        let mut merged = serde_json::to_value(&self.settings)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid settings: {}", error)))?;
        self.policy.validate_settings(&settings)?;

        if settings.palette != self.settings.palette {
            let applied = self.chart.replace_palette(parse_palette(&settings.palette)?);
            info!(applied, "palette updated");
        }
        self.settings = settings;
        Ok(self.settings.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn privilege(&self) -> Option<Privilege> {
        self.session.as_ref().map(|session| session.privilege)
    }

    pub fn host(&self) -> Option<&str> {
        self.session.as_ref().and_then(|session| session.host.as_deref())
    }

    pub fn allowed_actions(&self) -> Vec<Action> {
        self.policy.allowed_actions(self.privilege())
    }

    pub fn connect(&mut self, credentials: Credentials) -> AppResult<LoginResponse> {
        let backend = open_backend(&credentials)?;
        self.connect_with(credentials, backend)
    }

    /// Logs in through `backend`. Any failure leaves the current session as it
    /// was; success replaces it entirely.
    pub fn connect_with(&mut self, credentials: Credentials, backend: Box<dyn Backend>) -> AppResult<LoginResponse> {
        info!(backend = %redact_sql(&backend.describe()), "connecting");
        backend.ping().map_err(|error| match error {
            AppError::Query(message) => AppError::Connection(message),
            other => other,
        })?;

        let host = current_host(backend.as_ref())?;
        let privilege = if backend.dialect().supports_accounts() {
            current_privilege(backend.as_ref())?.unwrap_or(Privilege::ReadOnly)
        } else {
            Privilege::Admin
        };
        let mut schema = SchemaBrowser::new();
        let tables = schema.load_tables(backend.as_ref())?;
        let chart = new_chart(&self.settings, &credentials.database)?;

        if self.session.is_some() {
            self.disconnect();
        }

        self.accounts = AccountAdmin::new(&credentials.database, host.clone().unwrap_or_else(|| "%".to_string()));
        self.schema = schema;
        self.chart = chart;
        let response = LoginResponse {
            host: host.clone(),
            database: credentials.database.clone(),
            privilege: Some(privilege),
            tables: tables.clone(),
        };
        info!(
            database = %credentials.database,
            host = host.as_deref().unwrap_or("-"),
            privilege = privilege.as_str(),
            tables = tables.len(),
            "connected"
        );
        self.session = Some(SessionContext {
            credentials,
            backend,
            host: host.clone(),
            privilege,
        });

        self.events.publish(WorkbenchEvent::Connected {
            database: response.database.clone(),
            host,
            privilege: Some(privilege),
        });
        self.events.publish(WorkbenchEvent::TablesLoaded { tables });
        Ok(response)
    }

    /// Drops the session and everything derived from it. Idempotent.
    pub fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.schema.reset();
        self.chart.clear();
        self.accounts.reset();
        info!(database = %session.credentials.database, "disconnected");
        self.events.publish(WorkbenchEvent::Disconnected);
    }

    pub fn tables(&self) -> AppResult<Vec<String>> {
        authorized(&self.session, &self.policy, Action::Browse)?;
        Ok(self.schema.tables().to_vec())
    }

    pub fn refresh_tables(&mut self) -> AppResult<Vec<String>> {
        let session = authorized(&self.session, &self.policy, Action::Browse)?;
        let tables = self.schema.load_tables(session.backend.as_ref())?;
        self.events.publish(WorkbenchEvent::TablesLoaded { tables: tables.clone() });
        Ok(tables)
    }

    pub fn select_table(&mut self, table: &str) -> AppResult<Vec<Column>> {
        let session = authorized(&self.session, &self.policy, Action::Browse)?;
        let columns = self.schema.list_columns(session.backend.as_ref(), table)?;
        self.events.publish(WorkbenchEvent::ColumnsLoaded {
            table: table.to_string(),
            columns: columns.clone(),
        });
        Ok(columns)
    }

    pub fn columns(&self) -> &[Column] {
        self.schema.columns()
    }

    /// Field-level validity of bound text for `column`, for live form feedback.
    pub fn check_bounds(&mut self, table: &str, column: &str, min: Option<&str>, max: Option<&str>) -> AppResult<BoundValidity> {
        let session = authorized(&self.session, &self.policy, Action::Plot)?;
        let column_type = self
            .schema
            .column_type(session.backend.as_ref(), table, column)?
            .ok_or_else(|| AppError::NoData(format!("{}.{} has no values", table, column)))?;
        Ok(RangeBounds::check(column_type, min, max).0)
    }

    pub fn add_line(&mut self, mut payload: AddLinePayload) -> AppResult<RenderedLine> {
        let session = authorized(&self.session, &self.policy, Action::Plot)?;
        payload.axis = Some(payload.axis.unwrap_or(self.settings.default_axis));
        let mut source = SchemaSource {
            backend: session.backend.as_ref(),
            browser: &mut self.schema,
        };
        let added = self.chart.add_line(&mut source, &payload)?;

        if let Some(lines) = added.rescaled {
            self.events.publish(WorkbenchEvent::AxisRescaled {
                axis: added.line.axis,
                scale: added.line.scale,
                lines,
            });
        }
        self.events.publish(WorkbenchEvent::LineAdded {
            line: added.line.clone(),
        });
        Ok(added.line)
    }

    pub fn remove_line(&mut self, id: &LineId) -> AppResult<()> {
        self.chart.remove_line(id)?;
        self.events.publish(WorkbenchEvent::LineRemoved { id: id.clone() });
        Ok(())
    }

    pub fn set_axis_scale(&mut self, axis: Axis, scale: Scale) -> Vec<RenderedLine> {
        match self.chart.set_axis_scale(axis, scale) {
            Some(lines) => {
                self.events.publish(WorkbenchEvent::AxisRescaled {
                    axis,
                    scale,
                    lines: lines.clone(),
                });
                lines
            }
            None => Vec::new(),
        }
    }

    pub fn axis_scale(&self, axis: Axis) -> Scale {
        self.chart.axis_scale(axis)
    }

    pub fn set_line_visible(&mut self, id: &LineId, visible: bool) -> AppResult<RenderedLine> {
        let line = self.chart.set_line_visible(id, visible)?;
        self.events.publish(WorkbenchEvent::LineUpdated { line: line.clone() });
        Ok(line)
    }

    pub fn lines(&self) -> Vec<RenderedLine> {
        self.chart.lines()
    }

    pub fn clear_chart(&mut self) {
        self.chart.clear();
        self.events.publish(WorkbenchEvent::SessionCleared);
    }

    /// Inserts entered rows and appends them to the table's plotted lines.
    /// Rows before a failing row stay inserted and plotted.
    pub fn add_rows(&mut self, table: &str, rows: &[Vec<Option<String>>]) -> AppResult<AddDataResponse> {
        let session = authorized(&self.session, &self.policy, Action::AddData)?;
        let backend = session.backend.as_ref();
        let columns = self.schema.refresh_columns(backend, table)?;
        let outcome = table_data::insert_rows(backend, table, &columns, rows);

        let rows_inserted = outcome.inserted();
        let mut updated_lines = Vec::new();
        if rows_inserted > 0 {
            self.schema.invalidate_table(table);
            updated_lines = self.chart.append_records(table, &outcome.records);
            self.events.publish(WorkbenchEvent::DataAdded {
                table: table.to_string(),
                rows: rows_inserted,
            });
            for line in &updated_lines {
                self.events.publish(WorkbenchEvent::LineUpdated { line: line.clone() });
            }
        }

        if let Some((index, error)) = outcome.failure {
            self.notify(
                "Add data",
                &format!("row {} failed after {} rows were inserted: {}", index + 1, rows_inserted, error),
            );
            return Err(error);
        }
        Ok(AddDataResponse {
            rows_inserted,
            updated_lines,
        })
    }

    /// Comma-separated import with a header line, in the table's column order.
    pub fn import_csv(&mut self, table: &str, text: &str) -> AppResult<AddDataResponse> {
        let session = authorized(&self.session, &self.policy, Action::AddData)?;
        let width = self.schema.refresh_columns(session.backend.as_ref(), table)?.len();
        let rows = parse_import(text, width)?;
        if rows.is_empty() {
            return Err(AppError::NoData("import contains no data rows".to_string()));
        }
        self.add_rows(table, &rows)
    }

    pub fn import_csv_file(&mut self, table: &str, path: &Path) -> AppResult<AddDataResponse> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(|error| AppError::Io(format!("{:#}", error)))?;
        self.import_csv(table, &text)
    }

    /// CSV text for the request, or `None` when no row matches.
    pub fn export(&mut self, request: &ExportRequest) -> AppResult<Option<String>> {
        let session = authorized(&self.session, &self.policy, Action::Export)?;
        let backend = session.backend.as_ref();
        let query = build_export_query(&mut self.schema, backend, request)?;
        table_data::export(backend, &query)
    }

    pub fn export_to_file(&mut self, request: &ExportRequest, path: &Path) -> AppResult<Option<ExportResponse>> {
        let Some(text) = self.export(request)? else {
            self.notify("Export", &format!("no data in {} matches the constraints", request.table));
            return Ok(None);
        };
        let path = self.write_text(path, &text)?;
        Ok(Some(ExportResponse {
            path: path.display().to_string(),
        }))
    }

    /// Exports matching rows to `path`, then deletes them from the table.
    pub fn archive(&mut self, request: &ExportRequest, path: &Path) -> AppResult<ArchiveResponse> {
        let session = authorized(&self.session, &self.policy, Action::Archive)?;
        let backend = session.backend.as_ref();
        let query = build_export_query(&mut self.schema, backend, request)?;
        let Some(text) = table_data::export(backend, &query)? else {
            return Err(AppError::NoData(format!("nothing in {} to archive", request.table)));
        };
        let path = write_file(&self.settings, path, &text)?;
        let rows_deleted = table_data::delete_matching(backend, &query)?;
        self.schema.invalidate_table(&request.table);

        info!(table = %request.table, rows = rows_deleted, path = %path.display(), "archived");
        Ok(ArchiveResponse {
            path: path.display().to_string(),
            rows_deleted,
        })
    }

    pub fn add_column(&mut self, payload: &AddColumnPayload) -> AppResult<Vec<Column>> {
        let session = authorized(&self.session, &self.policy, Action::AddColumn)?;
        table_data::add_column(session.backend.as_ref(), payload)?;
        self.events.publish(WorkbenchEvent::ColumnAdded {
            table: payload.table.clone(),
            column: payload.column.clone(),
        });
        if self.schema.selected_table() == Some(payload.table.as_str()) {
            return self.select_table(&payload.table);
        }
        Ok(Vec::new())
    }

    pub fn list_accounts(&mut self) -> AppResult<Vec<Account>> {
        let session = account_session(&self.session, &self.policy)?;
        self.accounts.list_accounts(session.backend.as_ref())
    }

    pub fn create_account(&mut self, payload: &CreateAccountPayload) -> AppResult<Account> {
        let session = account_session(&self.session, &self.policy)?;
        let account = self
            .accounts
            .create_account(session.backend.as_ref(), &payload.user, &payload.password, payload.privilege)?;
        self.publish_accounts();
        Ok(account)
    }

    pub fn assign_privilege(&mut self, payload: &AssignPrivilegePayload) -> AppResult<Account> {
        let session = account_session(&self.session, &self.policy)?;
        let account = self.accounts.assign_privilege(
            session.backend.as_ref(),
            &payload.host,
            &payload.user,
            payload.privilege,
        )?;
        self.publish_accounts();
        Ok(account)
    }

    pub fn delete_account(&mut self, host: &str, user: &str) -> AppResult<()> {
        let session = account_session(&self.session, &self.policy)?;
        self.accounts.delete_account(session.backend.as_ref(), host, user)?;
        self.publish_accounts();
        Ok(())
    }

    fn publish_accounts(&self) {
        self.events.publish(WorkbenchEvent::AccountsChanged {
            accounts: self.accounts.accounts().to_vec(),
        });
    }

    /// Writes `text` to `path`, resolving relative paths against the export directory.
    pub fn write_text(&self, path: &Path, text: &str) -> AppResult<PathBuf> {
        write_file(&self.settings, path, text)
    }

    /// Opens `path` with the configured viewer, or the platform opener.
    pub fn open_with_viewer(&self, path: &Path) -> AppResult<()> {
        let path = resolve_export_path(&self.settings, path);
        let command_line = self
            .settings
            .viewer_command
            .clone()
            .unwrap_or_else(|| default_viewer().to_string());
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AppError::Validation("viewer command is empty".to_string()))?;

        Command::new(program)
            .args(parts)
            .arg(&path)
            .spawn()
            .with_context(|| format!("failed to launch {} for {}", program, path.display()))
            .map_err(|error| {
                warn!(error = %error, "viewer launch failed");
                AppError::Io(format!("{:#}", error))
            })?;
        Ok(())
    }
}

fn authorized<'a>(
    session: &'a Option<SessionContext>,
    policy: &AccessPolicy,
    action: Action,
) -> AppResult<&'a SessionContext> {
    let session = session
        .as_ref()
        .ok_or_else(|| AppError::Connection("not connected".to_string()))?;
    policy.check(Some(session.privilege), action)?;
    Ok(session)
}

fn account_session<'a>(session: &'a Option<SessionContext>, policy: &AccessPolicy) -> AppResult<&'a SessionContext> {
    let current = session
        .as_ref()
        .ok_or_else(|| AppError::Connection("not connected".to_string()))?;
    if !current.backend.dialect().supports_accounts() {
        return Err(AppError::Unsupported(format!(
            "account administration is not available for {}",
            current.backend.describe()
        )));
    }
    authorized(session, policy, Action::ManageAccounts)
}

fn build_export_query(
    schema: &mut SchemaBrowser,
    backend: &dyn Backend,
    request: &ExportRequest,
) -> AppResult<crate::query::ExportQuery> {
    table_data::export_query(request, |column| schema.column_type(backend, &request.table, column))
}

fn resolve_export_path(settings: &AppSettings, path: &Path) -> PathBuf {
    match &settings.export_directory {
        Some(directory) if path.is_relative() => Path::new(directory).join(path),
        _ => path.to_path_buf(),
    }
}

fn write_file(settings: &AppSettings, path: &Path, text: &str) -> AppResult<PathBuf> {
    let path = resolve_export_path(settings, path);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))
            .map_err(|error| AppError::Io(format!("{:#}", error)))?;
    }
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write {}", path.display()))
        .map_err(|error| AppError::Io(format!("{:#}", error)))?;
    info!(path = %path.display(), bytes = text.len(), "file written");
    Ok(path)
}

fn new_chart(settings: &AppSettings, database: &str) -> AppResult<ChartSession> {
    let mut chart = ChartSession::new(ColorPool::new(parse_palette(&settings.palette)?));
    chart.set_database(database);
    for axis in Axis::ALL {
        chart.set_axis_scale(axis, settings.default_scale);
    }
    Ok(chart)
}

fn default_viewer() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
