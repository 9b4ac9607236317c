//! Plotted lines, the two y-axes and their scales, and line color assignment.

use crate::db::{Row, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::models::{AddLinePayload, Axis, ColumnType, LineId, Point, RenderedLine, Scale};
use crate::palette::{Color, ColorPool};
use crate::query::DataQuery;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Where a chart session gets column types and points from.
pub trait SeriesSource {
    /// `None` when the column has no non-null value to infer a type from.
    fn column_type(&mut self, table: &str, column: &str) -> AppResult<Option<ColumnType>>;

    /// Runs `query` and returns the rows where both values are present, in x order.
    fn fetch_points(&mut self, query: &DataQuery, y_type: ColumnType) -> AppResult<Vec<Point>>;
}

#[derive(Debug, Clone)]
struct Line {
    id: LineId,
    name: String,
    color: Color,
    axis: Axis,
    visible: bool,
    x_type: ColumnType,
    y_type: ColumnType,
    points: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct LineAdded {
    pub line: RenderedLine,
    /// Set when the axis scale changed for the new line; holds the axis's
    /// other lines re-rendered, possibly none.
    pub rescaled: Option<Vec<RenderedLine>>,
}

#[derive(Debug, Clone)]
pub struct ChartSession {
    database: String,
    lines: Vec<Line>,
    scales: BTreeMap<Axis, Scale>,
    colors: ColorPool,
    pending_palette: Option<Vec<Color>>,
}

impl Default for ChartSession {
    fn default() -> Self {
        Self::new(ColorPool::default())
    }
}

impl ChartSession {
    pub fn new(colors: ColorPool) -> Self {
        Self {
            database: String::new(),
            lines: Vec::new(),
            scales: Axis::ALL.iter().map(|axis| (*axis, Scale::Linear)).collect(),
            colors,
            pending_palette: None,
        }
    }

    /// Database name used as the prefix of line display names.
    pub fn set_database(&mut self, database: impl Into<String>) {
        self.database = database.into();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, id: &LineId) -> bool {
        self.position(id).is_some()
    }

    pub fn axis_scale(&self, axis: Axis) -> Scale {
        self.scales.get(&axis).copied().unwrap_or_default()
    }

    pub fn lines_on(&self, axis: Axis) -> Vec<LineId> {
        self.lines
            .iter()
            .filter(|line| line.axis == axis)
            .map(|line| line.id.clone())
            .collect()
    }

    pub fn colors_in_use(&self) -> &[Color] {
        self.colors.in_use()
    }

    pub fn line(&self, id: &LineId) -> Option<RenderedLine> {
        self.position(id).map(|index| self.render(&self.lines[index]))
    }

    pub fn lines(&self) -> Vec<RenderedLine> {
        self.lines.iter().map(|line| self.render(line)).collect()
    }

    pub fn add_line(&mut self, source: &mut dyn SeriesSource, request: &AddLinePayload) -> AppResult<LineAdded> {
        let id = LineId::new(&request.table, &request.x_column, &request.y_column);
        if self.contains(&id) {
            return Err(AppError::Duplicate(format!("line {} is already plotted", id)));
        }

        let x_type = Self::plottable_type(source, &request.table, &request.x_column)?;
        let y_type = Self::plottable_type(source, &request.table, &request.y_column)?;
        let query = DataQuery::build(
            &request.table,
            &request.x_column,
            &request.y_column,
            x_type,
            request.min.as_deref(),
            request.max.as_deref(),
        )?;

        if !self.colors.has_free() {
            return Err(AppError::Validation(format!(
                "all {} line colors are in use; remove a line first",
                self.colors.capacity()
            )));
        }

        let points = source.fetch_points(&query, y_type)?;
        if points.is_empty() {
            return Err(AppError::NoData(format!("no rows to plot for {}", id)));
        }

        let color = self
            .colors
            .acquire()
            .ok_or_else(|| AppError::Internal("color pool exhausted after availability check".to_string()))?;

        let axis = request.axis.unwrap_or(Axis::Primary);
        let rescaled = request
            .scale
            .and_then(|requested| self.set_axis_scale(axis, requested));

        let line = Line {
            name: self.display_name(&id),
            id,
            color,
            axis,
            visible: true,
            x_type,
            y_type,
            points,
        };
        info!(
            line = %line.id,
            axis = line.axis.as_str(),
            color = %line.color,
            points = line.points.len(),
            "line added"
        );
        self.lines.push(line);

        let line = self.lines.last().map(|line| self.render(line)).ok_or_else(|| {
            AppError::Internal("line vanished after insert".to_string())
        })?;
        Ok(LineAdded { line, rescaled })
    }

    pub fn remove_line(&mut self, id: &LineId) -> AppResult<()> {
        let index = self
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("line {} is not plotted", id)))?;
        let line = self.lines.remove(index);
        self.colors.release(line.color);
        info!(line = %line.id, axis = line.axis.as_str(), color = %line.color, "line removed");
        Ok(())
    }

    /// Returns the re-rendered lines of `axis`, or `None` when the scale is unchanged.
    pub fn set_axis_scale(&mut self, axis: Axis, scale: Scale) -> Option<Vec<RenderedLine>> {
        if self.axis_scale(axis) == scale {
            return None;
        }
        self.scales.insert(axis, scale);
        let rendered: Vec<RenderedLine> = self
            .lines
            .iter()
            .filter(|line| line.axis == axis)
            .map(|line| self.render(line))
            .collect();
        info!(axis = axis.as_str(), scale = scale.as_str(), lines = rendered.len(), "axis rescaled");
        Some(rendered)
    }

    pub fn set_line_visible(&mut self, id: &LineId, visible: bool) -> AppResult<RenderedLine> {
        let index = self
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("line {} is not plotted", id)))?;
        self.lines[index].visible = visible;
        Ok(self.render(&self.lines[index]))
    }

    /// Appends `(x, y)` values to a plotted line. Pairs with a null on either
    /// side are skipped; a value that cannot be converted rejects the whole
    /// batch and leaves the line untouched.
    pub fn append_points(&mut self, id: &LineId, rows: &[(SqlValue, SqlValue)]) -> AppResult<RenderedLine> {
        let index = self
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("line {} is not plotted", id)))?;
        let line = &self.lines[index];
        let points = convert_pairs(line, rows.iter().map(|(x, y)| (x, y)))?;
        self.lines[index].points.extend(points);
        Ok(self.render(&self.lines[index]))
    }

    /// Feeds freshly inserted rows of `table` to every line plotted from it.
    /// The rows are already stored, so a pair that does not convert to the
    /// line's column types is skipped rather than failing the batch.
    pub fn append_records(&mut self, table: &str, records: &[Row]) -> Vec<RenderedLine> {
        let mut updated = Vec::new();
        for index in 0..self.lines.len() {
            let line = &self.lines[index];
            if line.id.table != table {
                continue;
            }
            let mut points = Vec::new();
            let mut skipped = 0usize;
            for record in records {
                let (Some(x), Some(y)) = (record.get(&line.id.x_column), record.get(&line.id.y_column)) else {
                    continue;
                };
                match convert_pairs(line, std::iter::once((x, y))) {
                    Ok(converted) => points.extend(converted),
                    Err(error) => {
                        warn!(line = %line.id, error = %error, "skipping unplottable row");
                        skipped += 1;
                    }
                }
            }
            if points.is_empty() {
                continue;
            }
            debug!(line = %line.id, points = points.len(), skipped, "points appended");
            self.lines[index].points.extend(points);
            updated.push(self.render(&self.lines[index]));
        }
        updated
    }

    /// Removes every line and releases every color. A palette staged while
    /// lines were plotted takes effect here.
    pub fn clear(&mut self) {
        let removed = self.lines.len();
        self.lines.clear();
        self.colors.release_all();
        if let Some(palette) = self.pending_palette.take() {
            self.colors.replace_palette(palette);
        }
        if removed > 0 {
            info!(lines = removed, "chart cleared");
        }
    }

    /// Applies a new palette now if nothing is plotted, otherwise on the next `clear`.
    pub fn replace_palette(&mut self, palette: Vec<Color>) -> bool {
        if self.colors.replace_palette(palette.clone()) {
            self.pending_palette = None;
            true
        } else {
            self.pending_palette = Some(palette);
            false
        }
    }

    fn plottable_type(source: &mut dyn SeriesSource, table: &str, column: &str) -> AppResult<ColumnType> {
        match source.column_type(table, column)? {
            None => Err(AppError::NoData(format!("{}.{} has no values to plot", table, column))),
            Some(ColumnType::Text) => Err(AppError::Validation(format!(
                "cannot plot line: {}.{} is a text column",
                table, column
            ))),
            Some(column_type) => Ok(column_type),
        }
    }

    fn position(&self, id: &LineId) -> Option<usize> {
        self.lines.iter().position(|line| &line.id == id)
    }

    fn display_name(&self, id: &LineId) -> String {
        if self.database.is_empty() {
            id.to_string()
        } else {
            format!("{}.{}", self.database, id)
        }
    }

    fn render(&self, line: &Line) -> RenderedLine {
        let scale = self.axis_scale(line.axis);
        let mut x = Vec::with_capacity(line.points.len());
        let mut y = Vec::with_capacity(line.points.len());
        let mut omitted_points = 0;
        for point in &line.points {
            match scale {
                Scale::Linear => {
                    x.push(point.x);
                    y.push(point.y);
                }
                Scale::Logarithmic if point.y > 0.0 => {
                    x.push(point.x);
                    y.push(point.y.log10());
                }
                Scale::Logarithmic => omitted_points += 1,
            }
        }
        RenderedLine {
            id: line.id.clone(),
            name: line.name.clone(),
            color: line.color,
            axis: line.axis,
            scale,
            visible: line.visible,
            x_type: line.x_type,
            y_type: line.y_type,
            x,
            y,
            omitted_points,
        }
    }
}

fn convert_pairs<'a>(
    line: &Line,
    pairs: impl Iterator<Item = (&'a SqlValue, &'a SqlValue)>,
) -> AppResult<Vec<Point>> {
    let mut points = Vec::new();
    for (x, y) in pairs {
        if x.is_null() || y.is_null() {
            continue;
        }
        let x_value = x.to_plot_value(line.x_type).ok_or_else(|| {
            AppError::Validation(format!("{:?} is not a valid {} value for {}", x, line.x_type.as_str(), line.id.x_column))
        })?;
        let y_value = y.to_plot_value(line.y_type).ok_or_else(|| {
            AppError::Validation(format!("{:?} is not a valid {} value for {}", y, line.y_type.as_str(), line.id.y_column))
        })?;
        points.push(Point::new(x_value, y_value));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Color;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource {
        types: HashMap<(String, String), Option<ColumnType>>,
        points: HashMap<(String, String, String), Vec<Point>>,
        fetches: usize,
    }

    impl FakeSource {
        fn column(mut self, table: &str, column: &str, column_type: Option<ColumnType>) -> Self {
            self.types.insert((table.to_string(), column.to_string()), column_type);
            self
        }

        fn series(mut self, table: &str, x: &str, y: &str, points: &[(f64, f64)]) -> Self {
            self.points.insert(
                (table.to_string(), x.to_string(), y.to_string()),
                points.iter().map(|(x, y)| Point::new(*x, *y)).collect(),
            );
            self
        }
    }

    impl SeriesSource for FakeSource {
        fn column_type(&mut self, table: &str, column: &str) -> AppResult<Option<ColumnType>> {
            Ok(self
                .types
                .get(&(table.to_string(), column.to_string()))
                .copied()
                .unwrap_or(Some(ColumnType::Numeric)))
        }

        fn fetch_points(&mut self, query: &DataQuery, _y_type: ColumnType) -> AppResult<Vec<Point>> {
            self.fetches += 1;
            Ok(self
                .points
                .get(&(query.table.clone(), query.x_column.clone(), query.y_column.clone()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn request(table: &str, x: &str, y: &str, axis: Axis) -> AddLinePayload {
        AddLinePayload {
            table: table.to_string(),
            x_column: x.to_string(),
            y_column: y.to_string(),
            axis: Some(axis),
            scale: None,
            min: None,
            max: None,
        }
    }

    fn source() -> FakeSource {
        FakeSource::default()
            .series("sensor", "ts", "temp", &[(1.0, 10.0), (2.0, 100.0), (3.0, 0.5)])
            .series("sensor", "ts", "humidity", &[(1.0, 40.0), (2.0, 0.0)])
            .series("sensor", "ts", "pressure", &[(1.0, 1000.0)])
    }

    #[test]
    fn add_line_assigns_identity_color_and_points() {
        let mut session = ChartSession::default();
        session.set_database("plant");
        let mut source = source();

        let added = session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("add");
        assert_eq!(added.line.id, LineId::new("sensor", "ts", "temp"));
        assert_eq!(added.line.name, "plant.sensor: (ts, temp)");
        assert_eq!(added.line.x, vec![1.0, 2.0, 3.0]);
        assert_eq!(added.line.color, "#1F77B4".parse::<Color>().expect("color"));
        assert!(added.line.visible);
        assert!(added.rescaled.is_none());
        assert_eq!(session.lines_on(Axis::Primary).len(), 1);
    }

    #[test]
    fn duplicate_line_is_rejected_without_change() {
        let mut session = ChartSession::default();
        let mut source = source();
        session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("first");
        let duplicate = session.add_line(&mut source, &request("sensor", "ts", "temp", Axis::Secondary));
        assert!(matches!(duplicate, Err(AppError::Duplicate(_))));
        assert_eq!(session.len(), 1);
        assert_eq!(session.colors_in_use().len(), 1);
        assert_eq!(source.fetches, 1);
    }

    #[test]
    fn reversed_bounds_never_reach_the_source() {
        let mut session = ChartSession::default();
        let mut source = source();
        let mut bad = request("sensor", "ts", "temp", Axis::Primary);
        bad.min = Some("10".to_string());
        bad.max = Some("5".to_string());
        let outcome = session.add_line(&mut source, &bad);
        assert!(matches!(outcome, Err(AppError::Validation(message)) if message.contains("min >= max")));
        assert_eq!(source.fetches, 0);
        assert!(session.is_empty());
    }

    #[test]
    fn empty_result_and_unsampled_columns_are_no_data() {
        let mut session = ChartSession::default();
        let mut source = source().column("empty", "v", None);
        let outcome = session.add_line(&mut source, &request("sensor", "ts", "missing", Axis::Primary));
        assert!(matches!(outcome, Err(AppError::NoData(_))));
        let outcome = session.add_line(&mut source, &request("empty", "ts", "v", Axis::Primary));
        assert!(matches!(outcome, Err(AppError::NoData(_))));
        assert!(session.colors_in_use().is_empty());
    }

    #[test]
    fn text_columns_cannot_be_plotted() {
        let mut session = ChartSession::default();
        let mut source = source().column("sensor", "label", Some(ColumnType::Text));
        let outcome = session.add_line(&mut source, &request("sensor", "ts", "label", Axis::Primary));
        assert!(matches!(outcome, Err(AppError::Validation(_))));
    }

    #[test]
    fn log_round_trip_restores_linear_values() {
        let mut session = ChartSession::default();
        let mut source = source();
        let original = session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("add")
            .line;

        let logged = session
            .set_axis_scale(Axis::Primary, Scale::Logarithmic)
            .expect("changed");
        assert_eq!(logged[0].y, vec![1.0, 2.0, 0.5f64.log10()]);
        assert!(session.set_axis_scale(Axis::Primary, Scale::Logarithmic).is_none());

        let restored = session.set_axis_scale(Axis::Primary, Scale::Linear).expect("changed");
        assert_eq!(restored[0].y, original.y);
        assert_eq!(restored[0].x, original.x);
    }

    #[test]
    fn log_axis_omits_non_positive_values() {
        let mut session = ChartSession::default();
        let mut source = source();
        let mut log_request = request("sensor", "ts", "humidity", Axis::Secondary);
        log_request.scale = Some(Scale::Logarithmic);
        let added = session.add_line(&mut source, &log_request).expect("add");
        assert_eq!(added.line.scale, Scale::Logarithmic);
        assert_eq!(added.line.y.len(), 1);
        assert_eq!(added.line.omitted_points, 1);
        assert_eq!(added.rescaled.map(|lines| lines.len()), Some(0));
        assert_eq!(session.axis_scale(Axis::Secondary), Scale::Logarithmic);
        assert_eq!(session.axis_scale(Axis::Primary), Scale::Linear);
    }

    #[test]
    fn requested_scale_rescales_a_populated_axis() {
        let mut session = ChartSession::default();
        let mut source = source();
        session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("first");
        let mut log_request = request("sensor", "ts", "pressure", Axis::Primary);
        log_request.scale = Some(Scale::Logarithmic);
        let added = session.add_line(&mut source, &log_request).expect("second");
        let rescaled = added.rescaled.expect("rescaled");
        assert_eq!(rescaled.len(), 1);
        assert_eq!(rescaled[0].scale, Scale::Logarithmic);
        assert_eq!(added.line.y, vec![3.0]);
    }

    #[test]
    fn removed_color_is_reused_after_the_rest_of_the_palette() {
        let palette: Vec<Color> = ["#000001", "#000002", "#000003"]
            .iter()
            .map(|hex| hex.parse().expect("color"))
            .collect();
        let mut session = ChartSession::new(ColorPool::new(palette.clone()));
        let mut source = FakeSource::default()
            .series("t", "x", "a", &[(1.0, 1.0)])
            .series("t", "x", "b", &[(1.0, 1.0)])
            .series("t", "x", "c", &[(1.0, 1.0)])
            .series("t", "x", "d", &[(1.0, 1.0)]);

        let first = session.add_line(&mut source, &request("t", "x", "a", Axis::Primary)).expect("a");
        session.add_line(&mut source, &request("t", "x", "b", Axis::Primary)).expect("b");
        session.remove_line(&first.line.id).expect("remove");
        let third = session.add_line(&mut source, &request("t", "x", "c", Axis::Primary)).expect("c");
        assert_eq!(third.line.color, palette[2]);
        let fourth = session.add_line(&mut source, &request("t", "x", "d", Axis::Primary)).expect("d");
        assert_eq!(fourth.line.color, palette[0]);

        let full = session.add_line(&mut source, &request("t", "x", "a", Axis::Secondary));
        assert!(matches!(full, Err(AppError::Validation(_))));
    }

    #[test]
    fn remove_unknown_line_is_not_found() {
        let mut session = ChartSession::default();
        let outcome = session.remove_line(&LineId::new("t", "x", "y"));
        assert!(matches!(outcome, Err(AppError::NotFound(_))));
    }

    #[test]
    fn append_skips_nulls_and_rejects_garbage_atomically() {
        let mut session = ChartSession::default();
        let mut source = source();
        let id = session
            .add_line(&mut source, &request("sensor", "ts", "pressure", Axis::Primary))
            .expect("add")
            .line
            .id;

        let updated = session
            .append_points(
                &id,
                &[
                    (SqlValue::Integer(2), SqlValue::Real(990.0)),
                    (SqlValue::Integer(3), SqlValue::Null),
                    (SqlValue::Text("4".to_string()), SqlValue::Text("1,010".to_string())),
                ],
            )
            .expect("append");
        assert_eq!(updated.x, vec![1.0, 2.0, 4.0]);
        assert_eq!(updated.y, vec![1000.0, 990.0, 1010.0]);

        let garbage = session.append_points(&id, &[(SqlValue::Integer(5), SqlValue::Text("high".to_string()))]);
        assert!(matches!(garbage, Err(AppError::Validation(_))));
        assert_eq!(session.line(&id).expect("line").x.len(), 3);
    }

    #[test]
    fn append_records_updates_only_lines_of_that_table() {
        let mut session = ChartSession::default();
        let mut source = source().series("other", "ts", "temp", &[(1.0, 1.0)]);
        session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("sensor");
        session
            .add_line(&mut source, &request("other", "ts", "temp", Axis::Secondary))
            .expect("other");

        let mut record = Row::new();
        record.insert("ts".to_string(), SqlValue::Integer(9));
        record.insert("temp".to_string(), SqlValue::Real(7.0));
        let updated = session.append_records("sensor", &[record]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id.table, "sensor");
        assert_eq!(updated[0].x.last(), Some(&9.0));
    }

    #[test]
    fn append_records_skips_rows_that_do_not_convert() {
        let mut session = ChartSession::default();
        let mut source = source();
        session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("sensor");

        let mut bad = Row::new();
        bad.insert("ts".to_string(), SqlValue::Integer(4));
        bad.insert("temp".to_string(), SqlValue::Text("warm".to_string()));
        let mut good = Row::new();
        good.insert("ts".to_string(), SqlValue::Integer(5));
        good.insert("temp".to_string(), SqlValue::Text("12.5".to_string()));

        let updated = session.append_records("sensor", &[bad.clone(), good]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].x, vec![1.0, 2.0, 3.0, 5.0]);
        assert_eq!(updated[0].y.last(), Some(&12.5));
        assert!(session.append_records("sensor", &[bad]).is_empty());
    }

    #[test]
    fn axis_scales_are_tracked_per_axis() {
        let mut session = ChartSession::default();
        assert_eq!(session.set_axis_scale(Axis::Secondary, Scale::Logarithmic), Some(Vec::new()));
        assert_eq!(session.set_axis_scale(Axis::Secondary, Scale::Logarithmic), None);
        assert_eq!(session.axis_scale(Axis::Secondary), Scale::Logarithmic);
        assert_eq!(session.axis_scale(Axis::Primary), Scale::Linear);
    }

    #[test]
    fn visibility_toggles_and_clear_is_idempotent() {
        let mut session = ChartSession::default();
        let mut source = source();
        let id = session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("add")
            .line
            .id;
        assert!(!session.set_line_visible(&id, false).expect("hide").visible);
        assert!(session.set_line_visible(&id, true).expect("show").visible);

        session.clear();
        assert!(session.is_empty());
        assert!(session.colors_in_use().is_empty());
        session.clear();
        assert!(session.is_empty());
        assert!(matches!(session.set_line_visible(&id, true), Err(AppError::NotFound(_))));
    }

    #[test]
    fn palette_change_waits_for_clear() {
        let mut session = ChartSession::default();
        let mut source = source();
        session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("add");
        let replacement = vec!["#123456".parse::<Color>().expect("color")];
        assert!(!session.replace_palette(replacement.clone()));
        session.clear();
        let added = session
            .add_line(&mut source, &request("sensor", "ts", "temp", Axis::Primary))
            .expect("add");
        assert_eq!(added.line.color, replacement[0]);
    }
}
