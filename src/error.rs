use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PeelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    EmptyData(String),

    #[error("the number of columns ({actual}) does not equal #replicates * #controls + 1 ({expected})")]
    #[diagnostic(help("check the input file is tab delimited (.tsv) and has correct data"))]
    ColumnCount { expected: usize, actual: usize },

    #[error("line {line} has {actual} fields but the header has {expected}")]
    #[diagnostic(help("check the input file is tab delimited (.tsv) and has correct data"))]
    RowWidth {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("invalid value {value:?} at row {row}, column {column}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("{0}")]
    InvalidCount(String),

    #[error("tolerance should be an integer in [0, #controls * #replicates] = [0, {columns}], got {tolerance}")]
    ToleranceOutOfRange { tolerance: usize, columns: usize },

    #[error("unknown cellular compartment: {0}")]
    UnknownCompartment(String),

    #[error("missing column {0:?}")]
    MissingColumn(String),

    #[error("failed to parse tab-separated data: {0}")]
    Tsv(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("unexpected uniprot payload: {0}")]
    UniprotPayload(String),

    #[error("id mapping job {job_id} finished with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("reached max trials ({attempts}) checking status of id mapping job {job_id}")]
    PollExhausted { job_id: String, attempts: u32 },
}

impl PeelError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PeelError::UniprotHttp(_)
                | PeelError::UniprotStatus { .. }
                | PeelError::UniprotPayload(_)
                | PeelError::JobFailed { .. }
                | PeelError::PollExhausted { .. }
        )
    }
}

impl From<csv::Error> for PeelError {
    fn from(err: csv::Error) -> Self {
        PeelError::Tsv(err.to_string())
    }
}
