use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::error::PeelError;
use crate::table::TsvTable;

pub const KEY_COLUMN: &str = "From";
pub const ENTRY_COLUMN: &str = "Entry";

/// Descriptive columns carried from the mapping into the final report.
pub const DETAIL_COLUMNS: [&str; 4] = ["Gene Names", "Protein names", "Organism", "Length"];

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("valid column-name pattern"));

const MISSING_MARKERS: [&str; 5] = ["", "na", "nan", "n/a", "null"];

fn is_missing(value: &str) -> bool {
    let trimmed = value.trim().to_lowercase();
    MISSING_MARKERS.contains(&trimmed.as_str())
}

pub fn sanitize_column_name(name: &str) -> String {
    NON_WORD.replace_all(name, "_").into_owned()
}

/// Per-sample intensities keyed by legacy identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantitativeDataset {
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    /// Row-major, `values[row][column]`.
    pub values: Vec<Vec<f64>>,
}

impl QuantitativeDataset {
    /// Validate the raw table shape and clean it: rows with any missing
    /// cell are dropped and every non-key cell must parse to a finite float.
    pub fn from_table(
        table: &TsvTable,
        controls: usize,
        replicates: usize,
    ) -> Result<Self, PeelError> {
        if table.is_empty() {
            return Err(PeelError::EmptyData("The file is empty".to_string()));
        }
        let expected = controls * replicates + 1;
        if table.width() != expected {
            return Err(PeelError::ColumnCount {
                expected,
                actual: table.width(),
            });
        }
        info!(
            rows = table.len(),
            columns = table.width(),
            "read in mass spec data"
        );

        let columns = table.headers[1..]
            .iter()
            .map(|name| sanitize_column_name(name))
            .collect::<Vec<_>>();

        let mut ids = Vec::new();
        let mut values = Vec::new();
        for (line, row) in table.rows.iter().enumerate() {
            if row.iter().any(|cell| is_missing(cell)) {
                continue;
            }
            let parsed = row[1..]
                .iter()
                .zip(&columns)
                .map(|(cell, column)| parse_value(cell, line + 1, column))
                .collect::<Result<Vec<_>, _>>()?;
            ids.push(row[0].trim().to_string());
            values.push(parsed);
        }
        info!(rows = ids.len(), "after dropping rows with missing value");
        if ids.is_empty() {
            return Err(PeelError::EmptyData(
                "Empty data after dropping missing values".to_string(),
            ));
        }
        Ok(Self {
            ids,
            columns,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn column_values(&self, column: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[column]).collect()
    }

    /// Pairwise Pearson correlation of the numeric columns.
    pub fn correlation_matrix(&self) -> Vec<Vec<f64>> {
        let columns = (0..self.columns.len())
            .map(|i| self.column_values(i))
            .collect::<Vec<_>>();
        columns
            .iter()
            .map(|a| columns.iter().map(|b| pearson(a, b)).collect())
            .collect()
    }

    pub fn correlation_table(&self) -> TsvTable {
        let mut headers = vec![String::new()];
        headers.extend(self.columns.iter().cloned());
        let mut table = TsvTable::new(headers);
        for (name, row) in self.columns.iter().zip(self.correlation_matrix()) {
            let mut cells = vec![name.clone()];
            cells.extend(row.iter().map(|value| format!("{value:.4}")));
            table.rows.push(cells);
        }
        table
    }
}

fn parse_value(cell: &str, row: usize, column: &str) -> Result<f64, PeelError> {
    let invalid = || PeelError::InvalidValue {
        row,
        column: column.to_string(),
        value: cell.to_string(),
    };
    let value = cell.trim().parse::<f64>().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }
    Ok(value)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return f64::NAN;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    cov / (var_a * var_b).sqrt()
}

/// One resolved legacy identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRecord {
    pub from: String,
    pub entry: String,
    /// Values for [`DETAIL_COLUMNS`], empty when the source lacks them.
    pub details: Vec<String>,
}

/// Legacy → canonical identifiers, first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMapping {
    records: Vec<MappingRecord>,
    index: HashMap<String, usize>,
}

impl IdentifierMapping {
    /// Build from a table with `From` and `Entry` columns.
    pub fn from_table(table: &TsvTable) -> Result<Self, PeelError> {
        let mut mapping = Self::default();
        if table.headers.is_empty() {
            return Ok(mapping);
        }
        let from = table
            .column_index(KEY_COLUMN)
            .ok_or_else(|| PeelError::MissingColumn(KEY_COLUMN.to_string()))?;
        let entry = table
            .column_index(ENTRY_COLUMN)
            .ok_or_else(|| PeelError::MissingColumn(ENTRY_COLUMN.to_string()))?;
        let details = DETAIL_COLUMNS
            .iter()
            .map(|name| table.column_index(name))
            .collect::<Vec<_>>();
        for row in &table.rows {
            mapping.insert(MappingRecord {
                from: row[from].trim().to_string(),
                entry: row[entry].trim().to_string(),
                details: details
                    .iter()
                    .map(|index| index.map(|i| row[i].clone()).unwrap_or_default())
                    .collect(),
            });
        }
        Ok(mapping)
    }

    /// A local override file: the first two columns are legacy and
    /// canonical identifiers whatever their headers say.
    pub fn from_override_table(mut table: TsvTable) -> Result<Self, PeelError> {
        if table.width() < 2 {
            return Err(PeelError::InvalidInput(
                "Latest ids file should have at least two columns".to_string(),
            ));
        }
        table.rename_column(0, KEY_COLUMN);
        table.rename_column(1, ENTRY_COLUMN);
        Self::from_table(&table)
    }

    /// Keeps the first record seen for a legacy identifier; rows with an
    /// empty side are ignored.
    pub fn insert(&mut self, record: MappingRecord) -> bool {
        if record.from.is_empty() || record.entry.is_empty() || self.index.contains_key(&record.from)
        {
            return false;
        }
        self.index.insert(record.from.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn extend(&mut self, other: IdentifierMapping) {
        for record in other.records {
            self.insert(record);
        }
    }

    pub fn get(&self, legacy: &str) -> Option<&MappingRecord> {
        self.index.get(legacy).map(|&i| &self.records[i])
    }

    pub fn contains(&self, legacy: &str) -> bool {
        self.index.contains_key(legacy)
    }

    /// The canonical identifier, or the legacy identifier itself when no
    /// mapping is known. Rows are never dropped for lack of a mapping.
    pub fn canonical<'a>(&'a self, legacy: &'a str) -> &'a str {
        self.get(legacy)
            .map(|record| record.entry.as_str())
            .unwrap_or(legacy)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Canonical identifier → the legacy identifiers that resolve to it.
    pub fn legacy_groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups = BTreeMap::<&str, Vec<&str>>::new();
        for record in &self.records {
            groups
                .entry(record.entry.as_str())
                .or_default()
                .push(record.from.as_str());
        }
        groups
    }

    pub fn to_table(&self) -> TsvTable {
        let mut headers = vec![KEY_COLUMN.to_string(), ENTRY_COLUMN.to_string()];
        headers.extend(DETAIL_COLUMNS.iter().map(|name| name.to_string()));
        let mut table = TsvTable::new(headers);
        for record in &self.records {
            let mut row = vec![record.from.clone(), record.entry.clone()];
            row.extend(record.details.iter().cloned());
            table.rows.push(row);
        }
        table
    }
}
