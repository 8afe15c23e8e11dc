use std::fmt;

use crate::error::{RowShapeMismatch, SchemaError};

pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// A single cell. Numbers are classified when the row is appended, but the
/// text the device sent is what gets displayed and saved, so "007" or
/// "1.50" come out exactly as they went in.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Integer { value: i64, text: String },
    Real { value: f64, text: String },
    Text(String),
}

impl Field {
    pub fn parse(token: &str) -> Field {
        let text = token.to_string();
        if let Ok(value) = token.parse::<i64>() {
            return Field::Integer { value, text };
        }
        match token.parse::<f64>() {
            // "nan", "inf" and friends stay text.
            Ok(value) if value.is_finite() => Field::Real { value, text },
            _ => Field::Text(text),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Field::Integer { text, .. } | Field::Real { text, .. } | Field::Text(text) => text,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

pub type Row = Vec<Field>;

/// Column names for a session. Never empty, names are unique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderSet {
    names: Vec<String>,
}

impl HeaderSet {
    /// Derives headers from the priming record: the tokens themselves if the
    /// device prints its own header line, otherwise Col0..ColN-1.
    pub fn establish(tokens: &[String], supplied: bool) -> Result<HeaderSet, SchemaError> {
        if tokens.is_empty() {
            return Err(SchemaError::EmptyHeaderRecord);
        }
        if !supplied {
            return Ok(HeaderSet {
                names: (0..tokens.len()).map(|i| format!("Col{i}")).collect(),
            });
        }

        let mut names: Vec<String> = Vec::with_capacity(tokens.len());
        for token in tokens {
            let mut name = token.clone();
            let mut suffix = 1;
            while names.contains(&name) {
                name = format!("{token}.{suffix}");
                suffix += 1;
            }
            names.push(name);
        }
        Ok(HeaderSet { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    headers: Option<HeaderSet>,
    rows: Vec<Row>,
}

impl Table {
    pub fn headers(&self) -> Option<&HeaderSet> {
        self.headers.as_ref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.as_ref().map_or(0, HeaderSet::len)
    }

    /// Renders the header and the first `max_rows` rows as aligned text,
    /// roughly the way a dataframe's head() looks.
    pub fn preview(&self, max_rows: usize) -> String {
        let Some(headers) = &self.headers else {
            return "Empty table (no header record was received)".to_string();
        };

        let shown = &self.rows[..self.rows.len().min(max_rows)];
        let cells: Vec<Vec<String>> = shown
            .iter()
            .map(|row| row.iter().map(|field| field.to_string()).collect())
            .collect();

        let index_width = match shown.len() {
            0 => 0,
            n => (n - 1).to_string().len(),
        };
        let mut widths: Vec<usize> = headers
            .names()
            .iter()
            .map(|name| name.chars().count())
            .collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        out.push_str(&" ".repeat(index_width));
        for (name, width) in headers.names().iter().zip(&widths) {
            out.push_str(&format!("  {name:>width$}"));
        }
        out.push('\n');
        for (index, row) in cells.iter().enumerate() {
            out.push_str(&format!("{index:<index_width$}"));
            for (cell, width) in row.iter().zip(&widths) {
                out.push_str(&format!("  {cell:>width$}"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "[{} rows x {} columns]",
            self.rows.len(),
            headers.len()
        ));
        out
    }
}

/// Builds the session's table: the priming record fixes the header set, every
/// later record must match its width.
#[derive(Debug, Default)]
pub struct TableAccumulator {
    table: Table,
    rejected: usize,
}

impl TableAccumulator {
    pub fn new() -> TableAccumulator {
        TableAccumulator::default()
    }

    pub fn establish_headers(
        &mut self,
        tokens: &[String],
        supplied: bool,
    ) -> Result<&HeaderSet, SchemaError> {
        if self.table.headers.is_some() {
            return Err(SchemaError::AlreadyEstablished);
        }
        let headers = HeaderSet::establish(tokens, supplied)?;
        Ok(self.table.headers.insert(headers))
    }

    pub fn headers(&self) -> Option<&HeaderSet> {
        self.table.headers.as_ref()
    }

    /// Appends a row if its width matches the header set. Before headers are
    /// established every row is rejected (expected width 0).
    pub fn append_row(&mut self, tokens: &[String]) -> Result<&Row, RowShapeMismatch> {
        let expected = self.table.column_count();
        if expected == 0 || tokens.len() != expected {
            self.rejected += 1;
            return Err(RowShapeMismatch {
                expected,
                found: tokens.len(),
            });
        }
        self.table
            .rows
            .push(tokens.iter().map(|token| Field::parse(token)).collect());
        Ok(&self.table.rows[self.table.rows.len() - 1])
    }

    /// Counts a record that was dropped before it could be split into fields.
    pub fn reject(&mut self) {
        self.rejected += 1;
    }

    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn snapshot(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}
