#![forbid(unsafe_code)]

//! Output encodings for result sets.

use crate::error::EngineError;
use crate::result::{ResultColumn, RowSink, RunSummary};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ds_core::Value;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Jsonl,
    Csv,
    Raw,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [Self::Table, Self::Json, Self::Jsonl, Self::Csv, Self::Raw];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == lower)
            .ok_or_else(|| {
                format!("unknown format `{value}` (expected table, json, jsonl, csv or raw)")
            })
    }
}

/// A [`RowSink`] that renders into a writer.
///
/// `jsonl`, `csv` and `raw` are written row by row; `table` and `json` need the whole
/// result and are written on `finish`.
pub struct Encoder<W: Write> {
    format: OutputFormat,
    out: W,
    columns: Vec<ResultColumn>,
    labels: Vec<String>,
    buffered: Vec<Vec<Value>>,
    header_written: bool,
}

impl<W: Write> Encoder<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self {
            format,
            out,
            columns: Vec::new(),
            labels: Vec::new(),
            buffered: Vec::new(),
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_csv_header(&mut self) -> std::io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        let line = self
            .columns
            .iter()
            .map(|column| csv_field(&column.name))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.out, "{line}")
    }

    fn object(&self, values: &[Value]) -> Json {
        let map = self
            .labels
            .iter()
            .zip(values)
            .map(|(label, value)| (label.clone(), value.to_json()))
            .collect::<Map<String, Json>>();
        Json::Object(map)
    }
}

impl<W: Write> RowSink for Encoder<W> {
    fn columns(&mut self, columns: &[ResultColumn]) -> Result<(), EngineError> {
        self.columns = columns.to_vec();
        self.labels = unique_labels(columns);
        Ok(())
    }

    fn row(&mut self, values: Vec<Value>) -> Result<(), EngineError> {
        match self.format {
            OutputFormat::Table | OutputFormat::Json => {
                self.buffered.push(values);
                Ok(())
            }
            OutputFormat::Jsonl => {
                let object = self.object(&values);
                serde_json::to_writer(&mut self.out, &object)
                    .map_err(|err| EngineError::Output(err.into()))?;
                writeln!(self.out).map_err(EngineError::Output)
            }
            OutputFormat::Csv => {
                self.write_csv_header().map_err(EngineError::Output)?;
                let line = values.iter().map(csv_cell).collect::<Vec<_>>().join(",");
                writeln!(self.out, "{line}").map_err(EngineError::Output)
            }
            OutputFormat::Raw => {
                let line = values.iter().map(raw_cell).collect::<Vec<_>>().join("\t");
                writeln!(self.out, "{line}").map_err(EngineError::Output)
            }
        }
    }

    fn finish(&mut self, _summary: &RunSummary) -> Result<(), EngineError> {
        match self.format {
            OutputFormat::Table => {
                let text = render_table(&self.columns, &self.buffered);
                self.out.write_all(text.as_bytes()).map_err(EngineError::Output)?;
            }
            OutputFormat::Json => {
                let rows = self
                    .buffered
                    .iter()
                    .map(|values| self.object(values))
                    .collect::<Vec<_>>();
                serde_json::to_writer_pretty(&mut self.out, &rows)
                    .map_err(|err| EngineError::Output(err.into()))?;
                writeln!(self.out).map_err(EngineError::Output)?;
            }
            OutputFormat::Csv => self.write_csv_header().map_err(EngineError::Output)?,
            OutputFormat::Jsonl | OutputFormat::Raw => {}
        }
        self.out.flush().map_err(EngineError::Output)
    }
}

/// Object keys for JSON output; a repeated label gets a `:2`, `:3`, ... suffix.
fn unique_labels(columns: &[ResultColumn]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        let mut label = column.name.clone();
        let mut n = 1;
        while labels.contains(&label) {
            n += 1;
            label = format!("{}:{n}", column.name);
        }
        labels.push(label);
    }
    labels
}

fn table_cell(value: &Value) -> String {
    value.to_string().replace('\r', "\\r").replace('\n', "\\n")
}

fn render_table(columns: &[ResultColumn], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();
    if !columns.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(columns.iter().map(|column| column.name.as_str()));
        for row in rows {
            table.add_row(row.iter().map(table_cell));
        }
        out.push_str(&table.to_string());
        out.push('\n');
    }
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    out.push_str(&format!("({} {noun})\n", rows.len()));
    out
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => csv_field(&other.to_string()),
    }
}

fn raw_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::ColumnType;
    use serde_json::json;

    fn encode(format: OutputFormat, columns: &[(&str, Option<ColumnType>)], rows: Vec<Vec<Value>>) -> String {
        let mut encoder = Encoder::new(format, Vec::new());
        let columns = columns
            .iter()
            .map(|(name, ty)| ResultColumn::new(*name, *ty))
            .collect::<Vec<_>>();
        encoder.columns(&columns).expect("columns");
        let count = rows.len();
        for row in rows {
            encoder.row(row).expect("row");
        }
        encoder
            .finish(&RunSummary {
                rows: count,
                ..RunSummary::default()
            })
            .expect("finish");
        String::from_utf8(encoder.into_inner()).expect("utf8")
    }

    fn sample() -> Vec<Vec<Value>> {
        vec![
            vec![Value::text("a,b"), Value::Integer(1), Value::Json(json!({"k": [1, 2]}))],
            vec![Value::text("line\nbreak"), Value::Null, Value::Null],
        ]
    }

    const COLUMNS: &[(&str, Option<ColumnType>)] = &[
        ("display", Some(ColumnType::Text)),
        ("n", None),
        ("doc", Some(ColumnType::Json)),
    ];

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!("JSONL".parse::<OutputFormat>(), Ok(OutputFormat::Jsonl));
        assert!("yaml".parse::<OutputFormat>().is_err());
        for format in OutputFormat::ALL {
            assert_eq!(format.as_str().parse::<OutputFormat>(), Ok(format));
        }
    }

    #[test]
    fn table_boxes_columns_and_marks_null() {
        let out = encode(OutputFormat::Table, COLUMNS, sample());
        let lines = out.lines().collect::<Vec<_>>();
        let row_with = |needles: &[&str]| {
            lines
                .iter()
                .any(|line| needles.iter().all(|needle| line.contains(needle)))
        };
        assert!(row_with(&["display", "n", "doc"]), "{out}");
        assert!(row_with(&["a,b", "1", "{\"k\":[1,2]}"]), "{out}");
        assert!(row_with(&["line\\nbreak", "NULL"]), "{out}");
        assert_eq!(lines.last(), Some(&"(2 rows)"));
        assert_eq!(encode(OutputFormat::Table, COLUMNS, Vec::new()).lines().last(), Some("(0 rows)"));
    }

    #[test]
    fn csv_quotes_and_leaves_null_empty() {
        let out = encode(OutputFormat::Csv, COLUMNS, sample());
        assert_eq!(
            out,
            "display,n,doc\n\"a,b\",1,\"{\"\"k\"\":[1,2]}\"\n\"line\nbreak\",,\n"
        );
        assert_eq!(encode(OutputFormat::Csv, COLUMNS, Vec::new()), "display,n,doc\n");
    }

    #[test]
    fn json_nests_documents_and_disambiguates_labels() {
        let out = encode(
            OutputFormat::Json,
            &[("id", None), ("id", None)],
            vec![vec![Value::Integer(1), Value::Integer(2)]],
        );
        let parsed: Json = serde_json::from_str(&out).expect("json");
        assert_eq!(parsed, json!([{"id": 1, "id:2": 2}]));

        let out = encode(OutputFormat::Json, COLUMNS, sample());
        let parsed: Json = serde_json::from_str(&out).expect("json");
        assert_eq!(parsed[0]["doc"], json!({"k": [1, 2]}));
        assert_eq!(parsed[1]["n"], Json::Null);
        assert_eq!(encode(OutputFormat::Json, COLUMNS, Vec::new()), "[]\n");
    }

    #[test]
    fn json_and_jsonl_carry_the_same_rows() {
        let json: Json = serde_json::from_str(&encode(OutputFormat::Json, COLUMNS, sample()))
            .expect("json");
        let lines = encode(OutputFormat::Jsonl, COLUMNS, sample())
            .lines()
            .map(|line| serde_json::from_str::<Json>(line).expect("line"))
            .collect::<Vec<_>>();
        assert_eq!(json, Json::Array(lines));
    }

    #[test]
    fn raw_prints_bare_values() {
        let out = encode(
            OutputFormat::Raw,
            &[("display", None)],
            vec![vec![Value::text("one")], vec![Value::Null], vec![Value::text("two")]],
        );
        assert_eq!(out, "one\n\ntwo\n");
        let out = encode(
            OutputFormat::Raw,
            &[("a", None), ("b", None)],
            vec![vec![Value::Integer(1), Value::Boolean(true)]],
        );
        assert_eq!(out, "1\ttrue\n");
    }
}
