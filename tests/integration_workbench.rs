use sql_plot_workbench_lib::{
    AddColumnPayload, AddLinePayload, AppSettings, AppState, Axis, ColumnDataType, ConstraintPayload, Credentials,
    ExportRequest, LineId, Scale, Workbench, WorkbenchEvent,
};
use std::path::{Path, PathBuf};

fn sensor_db(dir: &Path) -> PathBuf {
    let path = dir.join("plant.db");
    let conn = rusqlite::Connection::open(&path).expect("create db");
    conn.execute_batch(
        "CREATE TABLE sensor (ts DATETIME, temp REAL, note TEXT);
         INSERT INTO sensor VALUES ('2020-01-01 00:00:00', 21.5, 'start');
         INSERT INTO sensor VALUES ('2020-01-02 00:00:00', NULL, NULL);",
    )
    .expect("seed");
    path
}

fn connected(dir: &Path) -> Workbench {
    let mut workbench = Workbench::new(AppSettings::default()).expect("workbench");
    workbench
        .connect(Credentials::sqlite(sensor_db(dir).display().to_string()))
        .expect("connect");
    workbench
}

fn temperature_line() -> AddLinePayload {
    AddLinePayload {
        table: "sensor".to_string(),
        x_column: "ts".to_string(),
        y_column: "temp".to_string(),
        axis: Some(Axis::Primary),
        scale: Some(Scale::Linear),
        min: None,
        max: None,
    }
}

fn row(values: &[&str]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|value| (!value.is_empty()).then(|| value.to_string()))
        .collect()
}

#[test]
fn plots_sensor_readings_as_ole_dates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    assert_eq!(workbench.tables().expect("tables"), vec!["sensor"]);

    let line = workbench.add_line(temperature_line()).expect("line");
    assert_eq!(line.name, "plant.sensor: (ts, temp)");
    assert_eq!(line.x, vec![43831.0]);
    assert_eq!(line.y, vec![21.5]);
    assert_eq!(workbench.lines().len(), 1);
}

#[test]
fn added_rows_extend_plotted_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    let mut events = workbench.subscribe();
    workbench.add_line(temperature_line()).expect("line");

    let added = workbench
        .add_rows("sensor", &[row(&["2020-01-03", "19", "cool"]), row(&["", "", ""])])
        .expect("add rows");
    assert_eq!(added.rows_inserted, 1);
    assert_eq!(added.updated_lines.len(), 1);
    assert_eq!(added.updated_lines[0].x, vec![43831.0, 43833.0]);
    assert_eq!(added.updated_lines[0].y, vec![21.5, 19.0]);

    let mut saw_data_added = false;
    while let Ok(envelope) = events.try_recv() {
        if let WorkbenchEvent::DataAdded { table, rows } = envelope.event {
            assert_eq!((table.as_str(), rows), ("sensor", 1));
            saw_data_added = true;
        }
    }
    assert!(saw_data_added);
}

#[test]
fn csv_import_skips_header_and_blank_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    let csv = dir.path().join("readings.csv");
    std::fs::write(&csv, "ts,temp,note\r\n2020-01-05 06:00:00, 17.25 ,\r\n2020-01-06,NULL,late\n").expect("csv");

    let imported = workbench.import_csv_file("sensor", &csv).expect("import");
    assert_eq!(imported.rows_inserted, 2);

    let text = workbench
        .export(&ExportRequest {
            table: "sensor".to_string(),
            constraints: vec![ConstraintPayload {
                column: "ts".to_string(),
                min: Some("2020-01-05".to_string()),
                max: None,
                conjunction: None,
            }],
            sort_by: Some("ts".to_string()),
            order: None,
        })
        .expect("export")
        .expect("rows");
    assert_eq!(
        text,
        "ts, temp, note\n2020-01-05 06:00:00, 17.25, NULL\n2020-01-06 00:00:00, NULL, late\n"
    );
}

#[test]
fn export_without_matches_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    let target = dir.path().join("empty.csv");
    let request = ExportRequest {
        table: "sensor".to_string(),
        constraints: vec![ConstraintPayload {
            column: "temp".to_string(),
            min: Some("100".to_string()),
            max: None,
            conjunction: None,
        }],
        sort_by: None,
        order: None,
    };

    assert!(workbench.export_to_file(&request, &target).expect("export").is_none());
    assert!(!target.exists());
}

#[test]
fn archive_exports_then_deletes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    let target = dir.path().join("archive").join("old.csv");
    let request = ExportRequest {
        table: "sensor".to_string(),
        constraints: vec![ConstraintPayload {
            column: "ts".to_string(),
            min: None,
            max: Some("2020-01-02".to_string()),
            conjunction: None,
        }],
        sort_by: None,
        order: None,
    };

    let archived = workbench.archive(&request, &target).expect("archive");
    assert_eq!(archived.rows_deleted, 1);
    assert_eq!(
        std::fs::read_to_string(&target).expect("archive file"),
        "ts, temp, note\n2020-01-01 00:00:00, 21.5, start\n"
    );

    let remaining = workbench
        .export(&ExportRequest {
            table: "sensor".to_string(),
            ..ExportRequest::default()
        })
        .expect("export")
        .expect("rows");
    assert_eq!(remaining, "ts, temp, note\n2020-01-02 00:00:00, NULL, NULL\n");
}

#[test]
fn add_column_refreshes_selected_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut workbench = connected(dir.path());
    workbench.select_table("sensor").expect("columns");

    let columns = workbench
        .add_column(&AddColumnPayload {
            table: "sensor".to_string(),
            column: "humidity".to_string(),
            data_type: ColumnDataType::Double,
            length: None,
        })
        .expect("add column");
    let names: Vec<_> = columns.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(names, vec!["ts", "temp", "note", "humidity"]);
}

#[test]
fn app_state_reports_failures_as_strings_and_notifications() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = AppState::new(AppSettings::default()).expect("state");
    let mut events = state.subscribe();

    let missing = Credentials::sqlite(dir.path().join("absent.db").display().to_string());
    let error = state.login(missing).expect_err("missing file");
    assert!(error.starts_with("CONNECTION_FAILED"), "{}", error);

    let envelope = events.try_recv().expect("notification");
    assert!(matches!(envelope.event, WorkbenchEvent::Notification { .. }));

    state
        .login(Credentials::sqlite(sensor_db(dir.path()).display().to_string()))
        .expect("login");
    let line = state.add_line(temperature_line()).expect("line");
    let removed = state
        .remove_line(LineId::new("sensor", "ts", "temp"))
        .expect("remove");
    assert!(removed.success);
    assert_eq!(line.color.hex(), "#1F77B4");
    assert!(state.list_lines().is_empty());
    assert!(state.logout().success);
}
