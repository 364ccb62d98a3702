use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};

use crate::error::PeelError;

/// An in-memory tab-separated table of strings. Short rows are padded to
/// the header width; a row wider than the header is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TsvTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Parse raw lines, header first, as delivered by a paginated fetch.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self, PeelError> {
        let mut text = String::new();
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        Self::from_reader(text.as_bytes())
    }

    pub fn from_path(path: &Path) -> Result<Self, PeelError> {
        let file = File::open(path)
            .map_err(|err| PeelError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, PeelError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .quote(b'"')
            .has_headers(true)
            .flexible(true)
            .trim(Trim::None)
            .from_reader(reader);

        let headers = reader
            .headers()?
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        let width = headers.len();
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > width {
                return Err(PeelError::RowWidth {
                    line: record
                        .position()
                        .map_or(index + 2, |position| position.line() as usize),
                    expected: width,
                    actual: record.len(),
                });
            }
            let mut row = record.iter().map(|v| v.to_string()).collect::<Vec<_>>();
            row.resize(width, String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn column(&self, name: &str) -> Result<Vec<&str>, PeelError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| PeelError::MissingColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|row| row[index].as_str()).collect())
    }

    /// Drop columns by name; names that are absent are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep = self
            .headers
            .iter()
            .map(|header| !names.contains(&header.as_str()))
            .collect::<Vec<_>>();
        self.headers = retain_mask(std::mem::take(&mut self.headers), &keep);
        for row in &mut self.rows {
            *row = retain_mask(std::mem::take(row), &keep);
        }
    }

    pub fn project(&self, names: &[&str]) -> Result<TsvTable, PeelError> {
        let indices = names
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| PeelError::MissingColumn(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TsvTable {
            headers: names.iter().map(|name| name.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    pub fn rename_column(&mut self, index: usize, name: &str) {
        if let Some(header) = self.headers.get_mut(index) {
            *header = name.to_string();
        }
    }

    /// Append the rows of `other`, aligning its columns by name. Columns
    /// unknown to `self` are added and back-filled with empty cells.
    pub fn concat(&mut self, other: TsvTable) {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        for header in &other.headers {
            if self.column_index(header).is_none() {
                self.headers.push(header.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
        let positions = self
            .headers
            .iter()
            .map(|header| other.column_index(header))
            .collect::<Vec<_>>();
        for row in other.rows {
            self.rows.push(
                positions
                    .iter()
                    .map(|position| position.map(|i| row[i].clone()).unwrap_or_default())
                    .collect(),
            );
        }
    }

    pub fn to_tsv_string(&self) -> Result<String, PeelError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote(b'"')
            .from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| PeelError::Tsv(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| PeelError::Tsv(err.to_string()))
    }
}

fn retain_mask(values: Vec<String>, keep: &[bool]) -> Vec<String> {
    values
        .into_iter()
        .zip(keep)
        .filter_map(|(value, &keep)| keep.then_some(value))
        .collect()
}
