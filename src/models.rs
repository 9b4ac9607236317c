use crate::palette::{Color, CATEGORY10};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    Numeric,
    Text,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// `None` when the column holds no non-null value to sample.
    pub column_type: Option<ColumnType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Primary,
    Secondary,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Primary, Axis::Secondary];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scale {
    #[default]
    Linear,
    Logarithmic,
}

impl Scale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Logarithmic => "logarithmic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    ReadOnly,
    ReadAndWrite,
    Admin,
}

impl Privilege {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadAndWrite => "read-and-write",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub host: String,
    pub user: String,
    pub privilege: Privilege,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Driver {
    Mysql,
    Sqlite,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub driver: Driver,
    /// Host name for MySQL, database file path for SQLite.
    pub server: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

impl Credentials {
    pub fn sqlite(path: impl Into<String>) -> Self {
        let server = path.into();
        let database = std::path::Path::new(&server)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        Self {
            driver: Driver::Sqlite,
            server,
            port: None,
            user: String::new(),
            password: String::new(),
            database,
        }
    }

    pub fn mysql(server: impl Into<String>, user: impl Into<String>, password: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: Driver::Mysql,
            server: server.into(),
            port: None,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineId {
    pub table: String,
    pub x_column: String,
    pub y_column: String,
}

impl LineId {
    pub fn new(table: impl Into<String>, x_column: impl Into<String>, y_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            x_column: x_column.into(),
            y_column: y_column.into(),
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}, {})", self.table, self.x_column, self.y_column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedLine {
    pub id: LineId,
    pub name: String,
    pub color: Color,
    pub axis: Axis,
    pub scale: Scale,
    pub visible: bool,
    pub x_type: ColumnType,
    pub y_type: ColumnType,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Points left out of the rendered series (non-positive y on a log axis).
    pub omitted_points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLinePayload {
    pub table: String,
    pub x_column: String,
    pub y_column: String,
    /// Falls back to the configured default axis.
    pub axis: Option<Axis>,
    pub scale: Option<Scale>,
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintPayload {
    pub column: String,
    pub min: Option<String>,
    pub max: Option<String>,
    pub conjunction: Option<Conjunction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub table: String,
    #[serde(default)]
    pub constraints: Vec<ConstraintPayload>,
    pub sort_by: Option<String>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnDataType {
    Int,
    Bigint,
    Double,
    Float,
    Decimal,
    Datetime,
    Timestamp,
    Date,
    Varchar,
    Text,
}

impl ColumnDataType {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Bigint => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Float => "FLOAT",
            Self::Decimal => "DECIMAL",
            Self::Datetime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Varchar => "VARCHAR",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddColumnPayload {
    pub table: String,
    pub column: String,
    pub data_type: ColumnDataType,
    pub length: Option<u32>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountPayload {
    pub user: String,
    pub password: String,
    pub privilege: Privilege,
}

impl fmt::Debug for CreateAccountPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountPayload")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("privilege", &self.privilege)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPrivilegePayload {
    pub host: String,
    pub user: String,
    pub privilege: Privilege,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub host: Option<String>,
    pub database: String,
    pub privilege: Option<Privilege>,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDataResponse {
    pub rows_inserted: usize,
    pub updated_lines: Vec<RenderedLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResponse {
    pub path: String,
    pub rows_deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub palette: Vec<String>,
    pub default_axis: Axis,
    pub default_scale: Scale,
    pub viewer_command: Option<String>,
    pub export_directory: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            palette: CATEGORY10.iter().map(ToString::to_string).collect(),
            default_axis: Axis::Primary,
            default_scale: Scale::Linear,
            viewer_command: None,
            export_directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum WorkbenchEvent {
    Connected { database: String, host: Option<String>, privilege: Option<Privilege> },
    Disconnected,
    TablesLoaded { tables: Vec<String> },
    ColumnsLoaded { table: String, columns: Vec<Column> },
    LineAdded { line: RenderedLine },
    LineUpdated { line: RenderedLine },
    LineRemoved { id: LineId },
    AxisRescaled { axis: Axis, scale: Scale, lines: Vec<RenderedLine> },
    SessionCleared,
    DataAdded { table: String, rows: usize },
    ColumnAdded { table: String, column: String },
    AccountsChanged { accounts: Vec<Account> },
    Notification { title: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: WorkbenchEvent,
}
