use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::ClientSettings;
use crate::dataset::{ENTRY_COLUMN, IdentifierMapping};
use crate::domain::{AnnotationKind, Compartment};
use crate::error::PeelError;
use crate::fetch::ChunkedBatchFetcher;
use crate::table::TsvTable;
use crate::uniprot::{Connector, Transport};

/// Canonical identifiers believed to be in (or out of) the compartment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    ids: BTreeSet<String>,
}

impl AnnotationSet {
    /// Uses the `Entry` column when present, otherwise the first column.
    /// Duplicates collapse and empty cells are skipped.
    pub fn from_table(table: &TsvTable) -> Result<Self, PeelError> {
        if table.width() == 0 {
            return Ok(Self::default());
        }
        let index = table.column_index(ENTRY_COLUMN).unwrap_or(0);
        Ok(table
            .rows
            .iter()
            .map(|row| row[index].as_str())
            .collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|id| id.as_str())
    }

    /// Rewrite every identifier through the mapping, keeping unmapped ones.
    pub fn remap(&self, mapping: &IdentifierMapping) -> AnnotationSet {
        self.iter().map(|id| mapping.canonical(id)).collect()
    }
}

impl<'a> FromIterator<&'a str> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            ids: iter
                .into_iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(|id| id.to_string())
                .collect(),
        }
    }
}

/// The two reference sets as retrieved, rich or projected to `Entry`.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTables {
    pub true_positive: TsvTable,
    pub false_positive: TsvTable,
}

impl AnnotationTables {
    pub fn table(&self, kind: AnnotationKind) -> &TsvTable {
        match kind {
            AnnotationKind::TruePositive => &self.true_positive,
            AnnotationKind::FalsePositive => &self.false_positive,
        }
    }

    pub fn sets(&self) -> Result<(AnnotationSet, AnnotationSet), PeelError> {
        Ok((
            AnnotationSet::from_table(&self.true_positive)?,
            AnnotationSet::from_table(&self.false_positive)?,
        ))
    }
}

/// Retrieves both annotation sets for a compartment once per run.
pub struct AnnotationFetcher<C: Connector> {
    connector: C,
    settings: ClientSettings,
    compartment: Compartment,
    rich: bool,
    retrieved: Option<AnnotationTables>,
}

impl<C: Connector> AnnotationFetcher<C> {
    pub fn new(connector: C, settings: ClientSettings, compartment: Compartment, rich: bool) -> Self {
        Self {
            connector,
            settings,
            compartment,
            rich,
            retrieved: None,
        }
    }

    pub fn compartment(&self) -> Compartment {
        self.compartment
    }

    /// Fetch both sets concurrently on first use; later calls return the
    /// same tables without touching the network.
    pub async fn annotations(&mut self) -> Result<&AnnotationTables, PeelError> {
        if self.retrieved.is_none() {
            let tables = self.retrieve().await?;
            self.retrieved = Some(tables);
        }
        self.retrieved
            .as_ref()
            .ok_or_else(|| PeelError::UniprotPayload("annotations unavailable".to_string()))
    }

    async fn retrieve(&self) -> Result<AnnotationTables, PeelError> {
        let start = Instant::now();
        let transport = self.connector.connect()?;
        let (true_positive, false_positive) = tokio::try_join!(
            self.retrieve_one(&transport, AnnotationKind::TruePositive),
            self.retrieve_one(&transport, AnnotationKind::FalsePositive),
        )?;
        drop(transport);

        let mut tables = AnnotationTables {
            true_positive,
            false_positive,
        };
        if !self.rich {
            tables.true_positive = shorten(&tables.true_positive)?;
            tables.false_positive = shorten(&tables.false_positive)?;
        }
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "retrieving annotations finished"
        );
        Ok(tables)
    }

    async fn retrieve_one<T: Transport>(
        &self,
        transport: &T,
        kind: AnnotationKind,
    ) -> Result<TsvTable, PeelError> {
        info!(%kind, compartment = self.compartment.long_name(), "retrieving annotation from UniProt");
        debug!(rich = self.rich, "annotation query fields");
        let url = self
            .compartment
            .search_url(&self.settings.api_url, kind, self.rich);
        match ChunkedBatchFetcher::new(transport).fetch_table(&url, true).await {
            Ok(table) => {
                info!(%kind, entries = table.len(), "retrieved annotation entries");
                Ok(table)
            }
            Err(err) => {
                error!(%kind, error = %err, "retrieving annotation failed");
                Err(err)
            }
        }
    }
}

fn shorten(table: &TsvTable) -> Result<TsvTable, PeelError> {
    if table.width() == 0 {
        return Ok(TsvTable::new(vec![ENTRY_COLUMN.to_string()]));
    }
    table.project(&[ENTRY_COLUMN])
}
