use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use whaleminer_core::result_table::ResultTable;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format for {path}; use .csv or .json")]
    UnsupportedFormat { path: PathBuf },
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Writes the rendered result panel, choosing the format from the file extension.
pub fn export_table(path: &Path, table: &ResultTable) -> Result<usize, ExportError> {
    match ExportFormat::from_path(path) {
        Some(ExportFormat::Csv) => export_table_to_csv(path, table),
        Some(ExportFormat::Json) => export_table_to_json(path, table),
        None => Err(ExportError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

pub fn export_table_to_csv(path: &Path, table: &ResultTable) -> Result<usize, ExportError> {
    let titles = table.titles();
    let mut content = csv_line(titles.iter().map(String::as_str));
    for row in table.rows() {
        let cells = (0..titles.len()).map(|index| row.get(index).map_or("", String::as_str));
        content.push_str(&csv_line(cells));
    }

    write_file(path, content)?;
    Ok(table.rows().len())
}

pub fn export_table_to_json(path: &Path, table: &ResultTable) -> Result<usize, ExportError> {
    let records = table
        .rows()
        .iter()
        .map(|row| {
            let object = table
                .titles()
                .iter()
                .zip(row.iter().map(|cell| Value::String(cell.clone())))
                .map(|(title, cell)| (title.clone(), cell))
                .collect::<Map<_, _>>();
            Value::Object(object)
        })
        .collect::<Vec<_>>();

    write_file(path, serde_json::to_string_pretty(&records)?)?;
    Ok(records.len())
}

fn write_file(path: &Path, content: String) -> Result<(), ExportError> {
    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "exported result table");
    Ok(())
}

fn csv_line<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let mut line = cells.map(csv_escape).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;
    use whaleminer_core::result_table::ResultTable;

    use super::{export_table, ExportError};

    fn table() -> ResultTable {
        ResultTable::new(
            vec!["id".to_string(), "name".to_string()],
            &[
                vec![json!(1), json!("alpha")],
                vec![json!(2), json!("quote \"name\", too")],
                vec![json!(3), serde_json::Value::Null],
            ],
            Some(3),
            None,
        )
    }

    #[test]
    fn csv_export_escapes_cells() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("result.csv");

        let written = export_table(&path, &table()).expect("csv export failed");

        assert_eq!(written, 3);
        let output = fs::read_to_string(path).expect("failed to read csv output");
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "id,name");
        assert_eq!(lines[2], "2,\"quote \"\"name\"\", too\"");
        assert_eq!(lines[3], "3,NULL");
    }

    #[test]
    fn json_export_keys_cells_by_title() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("result.JSON");

        export_table(&path, &table()).expect("json export failed");

        let output = fs::read_to_string(path).expect("failed to read json output");
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("invalid json");
        assert_eq!(parsed[0]["id"], "1");
        assert_eq!(parsed[0]["name"], "alpha");
        assert_eq!(parsed.as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let error = export_table(&temp_dir.path().join("result.xlsx"), &table())
            .expect_err("xlsx is not supported");
        assert!(matches!(error, ExportError::UnsupportedFormat { .. }));
    }
}
