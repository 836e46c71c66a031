use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tabular result of one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Header line plus one line per row, every line `\n`-terminated.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_record(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            push_record(&mut out, cells.iter().map(String::as_str));
        }
        out
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let line = fields.map(escape_csv_field).collect::<Vec<_>>().join(",");
    out.push_str(&line);
    out.push('\n');
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() && f.is_finite() && f.fract() == 0.0 => {
                format!("{f:.1}")
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub fn escape_csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsvError {
    #[error("empty input")]
    Empty,
    #[error("unterminated quoted field on line {0}")]
    UnterminatedQuote(usize),
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount { line: usize, expected: usize, found: usize },
}

/// Parse CSV text into records. The first record is the header; every other
/// record must have the same number of fields.
pub fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, CsvError> {
    if text.trim().is_empty() {
        return Err(CsvError::Empty);
    }

    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut record_start = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                line += 1;
                record_start = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(CsvError::UnterminatedQuote(record_start));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // Blank lines carry no data.
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));

    let expected = records.first().map(Vec::len).ok_or(CsvError::Empty)?;
    for (i, r) in records.iter().enumerate() {
        if r.len() != expected {
            return Err(CsvError::FieldCount { line: i + 1, expected, found: r.len() });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_quotes_only_when_needed() {
        assert_eq!(escape_csv_field("hello"), "hello");
        assert_eq!(escape_csv_field("hello,world"), "\"hello,world\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn to_csv_writes_header_and_rows() {
        let r = QueryResult::new(
            vec!["store".into(), "orders".into(), "avg".into()],
            vec![
                vec![json!("Baner, Pune"), json!(12), json!(14.71)],
                vec![json!("Kothrud"), Value::Null, json!(3.0)],
            ],
        );
        assert_eq!(r.to_csv(), "store,orders,avg\n\"Baner, Pune\",12,14.71\nKothrud,,3.0\n");
    }

    #[test]
    fn parse_round_trips_quoted_fields() {
        let rows = parse_csv("a,b\n\"x, y\",\"he said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(rows, vec![vec!["a", "b"], vec!["x, y", "he said \"hi\""]]);
    }

    #[test]
    fn parse_rejects_ragged_rows() {
        let err = parse_csv("a,b\n1,2,3\n").unwrap_err();
        assert_eq!(err, CsvError::FieldCount { line: 2, expected: 2, found: 3 });
    }

    #[test]
    fn parse_rejects_unterminated_quote() {
        assert_eq!(parse_csv("a\n\"open\n").unwrap_err(), CsvError::UnterminatedQuote(2));
    }

    #[test]
    fn parse_header_only() {
        assert_eq!(parse_csv("a,b\n").unwrap(), vec![vec!["a", "b"]]);
        assert_eq!(parse_csv("   ").unwrap_err(), CsvError::Empty);
    }
}
