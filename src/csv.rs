//! Plain comma-separated text for import and export. Embedded commas and
//! quotes are not escaped.

use crate::db::ResultSet;
use crate::errors::{AppError, AppResult};

pub const EXPORT_SEPARATOR: &str = ", ";

/// Parses import text into rows of `width` cells. The first line is a header
/// and is skipped, as are blank lines. Lines may end in `\n`, `\r\n` or `\r`.
/// Cells are trimmed; blank and `NULL` cells become `None`. Extra cells are
/// dropped and missing cells are `None`.
pub fn parse_import(text: &str, width: usize) -> AppResult<Vec<Vec<Option<String>>>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .terminator(::csv::Terminator::CRLF)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|error| AppError::Validation(format!("unreadable import line: {}", error)))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let mut cells: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|cell| {
                if cell.is_empty() || cell.eq_ignore_ascii_case("null") {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        cells.resize(width, None);
        rows.push(cells);
    }
    Ok(rows)
}

/// Renders a result set with a header line. `None` when there are no rows.
pub fn format_export(result: &ResultSet) -> Option<String> {
    if result.is_empty() {
        return None;
    }
    let mut text = result.columns.join(EXPORT_SEPARATOR);
    text.push('\n');
    for row in &result.rows {
        let values: Vec<String> = row.iter().map(|value| value.to_export_string()).collect();
        text.push_str(&values.join(EXPORT_SEPARATOR));
        text.push('\n');
    }
    Some(text)
}
