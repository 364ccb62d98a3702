//! Classification of the quantitative dataset into the final protein set.
//!
//! The dataset is re-keyed on canonical identifiers, labelled from the two
//! annotation sets, cut per replicate column at the rank maximising
//! `TPR - FPR`, and a protein is kept when it survives the cut in enough
//! columns.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::annotation::AnnotationSet;
use crate::config::validate_tolerance;
use crate::dataset::{DETAIL_COLUMNS, ENTRY_COLUMN, IdentifierMapping, KEY_COLUMN, QuantitativeDataset};
use crate::error::PeelError;
use crate::roc::{Ranking, auc, cutoff_rank, rank_column};
use crate::table::TsvTable;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRow {
    pub entry: String,
    pub from: String,
    pub values: Vec<f64>,
    pub tp: bool,
    pub fp: bool,
    pub details: Vec<String>,
}

/// The dataset keyed by canonical identifier with `TP`/`FP` labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedDataset {
    pub columns: Vec<String>,
    pub rows: Vec<ClassifiedRow>,
}

impl ClassifiedDataset {
    /// Left-join the mapping (identity when absent) and the two annotation
    /// sets onto the dataset. No row is ever dropped.
    pub fn merge(
        dataset: &QuantitativeDataset,
        mapping: &IdentifierMapping,
        true_positive: &AnnotationSet,
        false_positive: &AnnotationSet,
    ) -> Self {
        let mut updated = 0usize;
        let rows = dataset
            .ids
            .iter()
            .zip(&dataset.values)
            .map(|(from, values)| {
                let record = mapping.get(from);
                let entry = record
                    .map(|record| record.entry.clone())
                    .unwrap_or_else(|| from.clone());
                if entry != *from {
                    updated += 1;
                }
                let details = record
                    .map(|record| record.details.clone())
                    .unwrap_or_else(|| vec![String::new(); DETAIL_COLUMNS.len()]);
                ClassifiedRow {
                    tp: true_positive.contains(&entry),
                    fp: false_positive.contains(&entry),
                    entry,
                    from: from.clone(),
                    values: values.clone(),
                    details,
                }
            })
            .collect::<Vec<_>>();
        info!(mapped_ids = updated, "id mapping is done");
        let classified = Self {
            columns: dataset.columns.clone(),
            rows,
        };
        info!(
            true_positive = classified.tp_count(),
            false_positive = classified.fp_count(),
            "adding annotations is done"
        );
        classified
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn tp_count(&self) -> usize {
        self.rows.iter().filter(|row| row.tp).count()
    }

    pub fn fp_count(&self) -> usize {
        self.rows.iter().filter(|row| row.fp).count()
    }

    fn labels(&self) -> (Vec<bool>, Vec<bool>) {
        self.rows.iter().map(|row| (row.tp, row.fp)).unzip()
    }

    fn column_values(&self, column: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row.values[column]).collect()
    }
}

/// Where one column was cut; reporting only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCutoff {
    pub column: String,
    pub rank: usize,
    pub entry: String,
    pub tpr: f64,
    pub fpr: f64,
    pub auc: f64,
    pub tp_total: usize,
    pub fp_total: usize,
}

#[derive(Debug, Clone)]
pub struct ColumnPass {
    pub cutoff: ColumnCutoff,
    pub ranking: Ranking,
    /// `include_<column>`, indexed by row.
    pub include: Vec<bool>,
}

impl ColumnPass {
    /// The ranked curve as a table: `Rank, Entry, <column>, TPR, FPR, TPR-FPR`.
    pub fn curve_table(&self, data: &ClassifiedDataset, column: usize) -> TsvTable {
        let mut table = TsvTable::new(vec![
            "Rank".to_string(),
            ENTRY_COLUMN.to_string(),
            self.cutoff.column.clone(),
            "TPR".to_string(),
            "FPR".to_string(),
            "TPR-FPR".to_string(),
        ]);
        for (rank, &row) in self.ranking.order.iter().enumerate() {
            table.rows.push(vec![
                rank.to_string(),
                data.rows[row].entry.clone(),
                data.rows[row].values[column].to_string(),
                self.ranking.tpr[rank].to_string(),
                self.ranking.fpr[rank].to_string(),
                self.ranking.diff[rank].to_string(),
            ]);
        }
        table
    }
}

pub struct ClassificationEngine {
    tolerance: usize,
}

impl ClassificationEngine {
    pub fn new(tolerance: usize) -> Self {
        Self { tolerance }
    }

    /// Rank one column and flag the rows at or above its cutoff.
    pub fn column_pass(&self, data: &ClassifiedDataset, column: usize) -> Result<ColumnPass, PeelError> {
        if data.is_empty() {
            return Err(PeelError::EmptyData("no rows to classify".to_string()));
        }
        let name = data
            .columns
            .get(column)
            .cloned()
            .ok_or_else(|| PeelError::MissingColumn(format!("column {column}")))?;
        let (tp, fp) = data.labels();
        let ranking = rank_column(&data.column_values(column), &tp, &fp);
        if ranking.tp_total == 0 {
            warn!(column = %name, "no true positive rows, TPR fixed at 0");
        }
        if ranking.fp_total == 0 {
            warn!(column = %name, "no false positive rows, FPR fixed at 0");
        }

        let rank = cutoff_rank(&ranking.diff).unwrap_or(0);
        let mut include = vec![false; data.len()];
        for &row in &ranking.order[..=rank] {
            include[row] = true;
        }
        let cutoff = ColumnCutoff {
            entry: data.rows[ranking.order[rank]].entry.clone(),
            tpr: ranking.tpr[rank],
            fpr: ranking.fpr[rank],
            auc: auc(&ranking.fpr, &ranking.tpr),
            tp_total: ranking.tp_total,
            fp_total: ranking.fp_total,
            column: name,
            rank,
        };
        info!(
            column = %cutoff.column,
            rank,
            entry = %cutoff.entry,
            tpr = cutoff.tpr,
            fpr = cutoff.fpr,
            auc = cutoff.auc,
            "cut-off determined"
        );
        Ok(ColumnPass {
            cutoff,
            ranking,
            include,
        })
    }

    /// Run every column pass in column order and aggregate the flags.
    pub fn call(&self, data: &ClassifiedDataset) -> Result<(FinalCall, Vec<ColumnPass>), PeelError> {
        if data.is_empty() {
            return Err(PeelError::EmptyData("no rows to classify".to_string()));
        }
        validate_tolerance(self.tolerance, data.columns.len())?;
        let passes = (0..data.columns.len())
            .map(|column| self.column_pass(data, column))
            .collect::<Result<Vec<_>, _>>()?;
        let include = passes
            .iter()
            .map(|pass| pass.include.clone())
            .collect::<Vec<_>>();
        let cutoffs = passes
            .iter()
            .map(|pass| pass.cutoff.clone())
            .collect::<Vec<_>>();
        let call = FinalCall::aggregate(data, cutoffs, include, self.tolerance)?;
        info!(proteins = call.selected.len(), "true positive proteins found");
        Ok((call, passes))
    }
}

#[derive(Debug, Clone)]
pub struct FinalCall {
    pub cutoffs: Vec<ColumnCutoff>,
    /// `include[column][row]`.
    pub include: Vec<Vec<bool>>,
    pub include_sum: Vec<usize>,
    pub tolerance: usize,
    pub threshold: usize,
    /// Included rows, first row per canonical identifier, dataset order.
    pub selected: Vec<usize>,
}

impl FinalCall {
    pub fn aggregate(
        data: &ClassifiedDataset,
        cutoffs: Vec<ColumnCutoff>,
        include: Vec<Vec<bool>>,
        tolerance: usize,
    ) -> Result<Self, PeelError> {
        let columns = include.len();
        validate_tolerance(tolerance, columns)?;
        let include_sum = (0..data.len())
            .map(|row| include.iter().filter(|flags| flags[row]).count())
            .collect::<Vec<_>>();
        let mut call = Self {
            cutoffs,
            include,
            include_sum,
            tolerance,
            threshold: columns - tolerance,
            selected: Vec::new(),
        };
        call.selected = call.select(data);
        Ok(call)
    }

    /// Re-apply aggregation with another tolerance; cutoffs are unchanged.
    pub fn with_tolerance(&self, data: &ClassifiedDataset, tolerance: usize) -> Result<Self, PeelError> {
        Self::aggregate(data, self.cutoffs.clone(), self.include.clone(), tolerance)
    }

    fn select(&self, data: &ClassifiedDataset) -> Vec<usize> {
        let mut seen = HashSet::new();
        (0..data.len())
            .filter(|&row| self.include_sum[row] >= self.threshold)
            .filter(|&row| seen.insert(data.rows[row].entry.as_str()))
            .collect()
    }

    pub fn entries<'a>(&self, data: &'a ClassifiedDataset) -> Vec<&'a str> {
        self.selected
            .iter()
            .map(|&row| data.rows[row].entry.as_str())
            .collect()
    }

    /// Comma-joined identifiers for downstream tools.
    pub fn id_list(&self, data: &ClassifiedDataset) -> String {
        self.entries(data).join(",")
    }

    /// `Entry, Gene Names, Protein names, Organism, Length`.
    pub fn final_table(&self, data: &ClassifiedDataset) -> TsvTable {
        let mut headers = vec![ENTRY_COLUMN.to_string()];
        headers.extend(DETAIL_COLUMNS.iter().map(|name| name.to_string()));
        let mut table = TsvTable::new(headers);
        for &row in &self.selected {
            let record = &data.rows[row];
            let mut cells = vec![record.entry.clone()];
            cells.extend(record.details.iter().cloned());
            table.rows.push(cells);
        }
        table
    }

    /// Selected rows with every value, label and include flag.
    pub fn raw_table(&self, data: &ClassifiedDataset) -> TsvTable {
        let mut headers = vec![ENTRY_COLUMN.to_string(), KEY_COLUMN.to_string()];
        headers.extend(data.columns.iter().cloned());
        headers.extend(["TP".to_string(), "FP".to_string()]);
        headers.extend(data.columns.iter().map(|column| format!("include_{column}")));
        headers.push("include_sum".to_string());
        headers.extend(DETAIL_COLUMNS.iter().map(|name| name.to_string()));

        let mut table = TsvTable::new(headers);
        for &row in &self.selected {
            let record = &data.rows[row];
            let mut cells = vec![record.entry.clone(), record.from.clone()];
            cells.extend(record.values.iter().map(|value| value.to_string()));
            cells.push(u8::from(record.tp).to_string());
            cells.push(u8::from(record.fp).to_string());
            cells.extend(self.include.iter().map(|flags| flags[row].to_string()));
            cells.push(self.include_sum[row].to_string());
            cells.extend(record.details.iter().cloned());
            table.rows.push(cells);
        }
        table
    }
}
