//! The run pipeline and the capabilities it is built from.
//!
//! A run needs three things: a way to resolve legacy identifiers, a way to
//! obtain the two annotation sets and somewhere to put its artifacts. Each
//! is a trait with local-file, remote and cached implementations.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info};

use crate::annotation::{AnnotationFetcher, AnnotationTables};
use crate::config::ClientSettings;
use crate::dataset::{IdentifierMapping, QuantitativeDataset};
use crate::domain::{AnnotationKind, Compartment};
use crate::engine::{ClassificationEngine, ClassifiedDataset, ColumnCutoff};
use crate::error::PeelError;
use crate::idmapping::IdResolver;
use crate::store::Store;
use crate::table::TsvTable;
use crate::uniprot::Connector;

#[derive(Debug, Clone, Default)]
pub struct ResolvedIds {
    pub mapping: IdentifierMapping,
    pub failed_id_mapping: usize,
    pub no_id_mapping: BTreeSet<String>,
    /// Freshly retrieved mapping rows, worth archiving.
    pub retrieved: Option<TsvTable>,
}

pub trait IdentifierSource {
    fn resolve_identifiers(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<ResolvedIds, PeelError>>;
}

pub trait AnnotationSource {
    fn fetch_annotations(
        &mut self,
        compartment: Compartment,
    ) -> impl Future<Output = Result<AnnotationTables, PeelError>>;

    /// Legacy identifiers that must go through the identifier mapping
    /// before the sets are usable. Empty for canonical sources.
    fn legacy_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the fetched tables were retrieved remotely this run.
    fn is_fresh(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Table { name: String, table: TsvTable },
    Text { name: String, content: String },
    Json { name: String, value: serde_json::Value },
}

impl Artifact {
    pub fn name(&self) -> &str {
        match self {
            Artifact::Table { name, .. } | Artifact::Text { name, .. } | Artifact::Json { name, .. } => {
                name
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PeelError> {
        match self {
            Artifact::Table { table, .. } => Ok(table.to_tsv_string()?.into_bytes()),
            Artifact::Text { content, .. } => Ok(content.clone().into_bytes()),
            Artifact::Json { value, .. } => serde_json::to_vec_pretty(value)
                .map_err(|err| PeelError::Filesystem(err.to_string())),
        }
    }
}

pub trait ArtifactSink {
    fn emit(&mut self, artifact: Artifact) -> Result<(), PeelError>;
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for &mut S {
    fn emit(&mut self, artifact: Artifact) -> Result<(), PeelError> {
        (**self).emit(artifact)
    }
}

// Identifier sources

pub struct RemoteIdentifiers<C: Connector> {
    resolver: IdResolver<C>,
}

impl<C: Connector> RemoteIdentifiers<C> {
    pub fn new(connector: C, settings: ClientSettings) -> Self {
        Self {
            resolver: IdResolver::new(connector, settings),
        }
    }
}

impl<C: Connector> IdentifierSource for RemoteIdentifiers<C> {
    async fn resolve_identifiers(&self, ids: &[String]) -> Result<ResolvedIds, PeelError> {
        let resolution = self.resolver.resolve(ids).await?;
        let mapping = IdentifierMapping::from_table(&resolution.table)?;
        Ok(ResolvedIds {
            retrieved: Some(mapping.to_table()),
            mapping,
            failed_id_mapping: resolution.failed_id_mapping,
            no_id_mapping: resolution.no_id_mapping,
        })
    }
}

/// A mapping read from a local file; nothing is resolved remotely.
pub struct LocalIdentifiers {
    mapping: IdentifierMapping,
}

impl LocalIdentifiers {
    pub fn from_path(path: &Path) -> Result<Self, PeelError> {
        let table = read_override(path)?;
        info!(rows = table.len(), "read in latest ids file");
        Ok(Self {
            mapping: IdentifierMapping::from_override_table(table)?,
        })
    }

    pub fn new(mapping: IdentifierMapping) -> Self {
        Self { mapping }
    }
}

impl IdentifierSource for LocalIdentifiers {
    async fn resolve_identifiers(&self, ids: &[String]) -> Result<ResolvedIds, PeelError> {
        let no_id_mapping = ids
            .iter()
            .filter(|id| !self.mapping.contains(id))
            .cloned()
            .collect();
        Ok(ResolvedIds {
            mapping: self.mapping.clone(),
            failed_id_mapping: 0,
            no_id_mapping,
            retrieved: None,
        })
    }
}

pub enum IdentifierBackend<C: Connector> {
    Local(LocalIdentifiers),
    Remote(RemoteIdentifiers<C>),
}

impl<C: Connector> IdentifierSource for IdentifierBackend<C> {
    async fn resolve_identifiers(&self, ids: &[String]) -> Result<ResolvedIds, PeelError> {
        match self {
            IdentifierBackend::Local(source) => source.resolve_identifiers(ids).await,
            IdentifierBackend::Remote(source) => source.resolve_identifiers(ids).await,
        }
    }
}

// Annotation sources

pub struct RemoteAnnotations<C: Connector> {
    fetcher: AnnotationFetcher<C>,
}

impl<C: Connector> RemoteAnnotations<C> {
    pub fn new(connector: C, settings: ClientSettings, compartment: Compartment, rich: bool) -> Self {
        Self {
            fetcher: AnnotationFetcher::new(connector, settings, compartment, rich),
        }
    }
}

impl<C: Connector> AnnotationSource for RemoteAnnotations<C> {
    async fn fetch_annotations(
        &mut self,
        compartment: Compartment,
    ) -> Result<AnnotationTables, PeelError> {
        if compartment != self.fetcher.compartment() {
            return Err(PeelError::InvalidInput(format!(
                "annotation source configured for {}, asked for {compartment}",
                self.fetcher.compartment()
            )));
        }
        self.fetcher.annotations().await.cloned()
    }

    fn is_fresh(&self) -> bool {
        true
    }
}

/// User-supplied annotation files. Only their first column is used.
pub struct LocalAnnotations {
    tables: AnnotationTables,
    map_ids: bool,
}

impl LocalAnnotations {
    pub fn from_paths(
        true_positive: &Path,
        false_positive: &Path,
        map_ids: bool,
    ) -> Result<Self, PeelError> {
        Self::new(
            read_override(true_positive)?,
            read_override(false_positive)?,
            map_ids,
        )
    }

    pub fn new(true_positive: TsvTable, false_positive: TsvTable, map_ids: bool) -> Result<Self, PeelError> {
        Ok(Self {
            tables: AnnotationTables {
                true_positive: first_column(true_positive, AnnotationKind::TruePositive)?,
                false_positive: first_column(false_positive, AnnotationKind::FalsePositive)?,
            },
            map_ids,
        })
    }
}

fn first_column(table: TsvTable, kind: AnnotationKind) -> Result<TsvTable, PeelError> {
    if table.width() < 1 {
        return Err(PeelError::InvalidInput(format!(
            "annotation_{kind} file should have at least one column of protein ids"
        )));
    }
    info!(%kind, rows = table.len(), "read in local annotation file");
    let mut projected = TsvTable::new(vec!["Entry".to_string()]);
    projected.rows = table.rows.into_iter().map(|row| vec![row[0].clone()]).collect();
    Ok(projected)
}

impl AnnotationSource for LocalAnnotations {
    async fn fetch_annotations(
        &mut self,
        _compartment: Compartment,
    ) -> Result<AnnotationTables, PeelError> {
        Ok(self.tables.clone())
    }

    fn legacy_ids(&self) -> Vec<String> {
        if !self.map_ids {
            return Vec::new();
        }
        let (true_positive, false_positive) = match self.tables.sets() {
            Ok(sets) => sets,
            Err(_) => return Vec::new(),
        };
        true_positive
            .iter()
            .chain(false_positive.iter())
            .map(|id| id.to_string())
            .collect()
    }
}

/// Reads annotation tables from a cache directory, falling back to (and
/// then seeding the cache from) another source.
pub struct CachedAnnotations<A: AnnotationSource> {
    dir: Utf8PathBuf,
    fallback: A,
    fresh: bool,
}

impl<A: AnnotationSource> CachedAnnotations<A> {
    pub fn new(dir: Utf8PathBuf, fallback: A) -> Self {
        Self {
            dir,
            fallback,
            fresh: false,
        }
    }

    fn path(&self, kind: AnnotationKind) -> Utf8PathBuf {
        self.dir.join(kind.file_name())
    }

    fn read_cached(&self) -> Result<Option<AnnotationTables>, PeelError> {
        let true_positive = self.path(AnnotationKind::TruePositive);
        let false_positive = self.path(AnnotationKind::FalsePositive);
        if !true_positive.as_std_path().exists() || !false_positive.as_std_path().exists() {
            return Ok(None);
        }
        Ok(Some(AnnotationTables {
            true_positive: TsvTable::from_path(true_positive.as_std_path())?,
            false_positive: TsvTable::from_path(false_positive.as_std_path())?,
        }))
    }
}

impl<A: AnnotationSource> AnnotationSource for CachedAnnotations<A> {
    async fn fetch_annotations(
        &mut self,
        compartment: Compartment,
    ) -> Result<AnnotationTables, PeelError> {
        if let Some(tables) = self.read_cached()? {
            info!(dir = %self.dir, "using cached annotations");
            return Ok(tables);
        }
        let tables = self.fallback.fetch_annotations(compartment).await?;
        self.fresh = self.fallback.is_fresh();
        for kind in [AnnotationKind::TruePositive, AnnotationKind::FalsePositive] {
            let content = tables.table(kind).to_tsv_string()?;
            Store::write_bytes_atomic(&self.path(kind), content.as_bytes())?;
        }
        debug!(dir = %self.dir, "annotation cache seeded");
        Ok(tables)
    }

    fn legacy_ids(&self) -> Vec<String> {
        self.fallback.legacy_ids()
    }

    fn is_fresh(&self) -> bool {
        self.fresh
    }
}

pub enum AnnotationBackend<C: Connector> {
    Local(LocalAnnotations),
    Remote(RemoteAnnotations<C>),
    Cached(CachedAnnotations<RemoteAnnotations<C>>),
}

impl<C: Connector> AnnotationSource for AnnotationBackend<C> {
    async fn fetch_annotations(
        &mut self,
        compartment: Compartment,
    ) -> Result<AnnotationTables, PeelError> {
        match self {
            AnnotationBackend::Local(source) => source.fetch_annotations(compartment).await,
            AnnotationBackend::Remote(source) => source.fetch_annotations(compartment).await,
            AnnotationBackend::Cached(source) => source.fetch_annotations(compartment).await,
        }
    }

    fn legacy_ids(&self) -> Vec<String> {
        match self {
            AnnotationBackend::Local(source) => source.legacy_ids(),
            AnnotationBackend::Remote(source) => source.legacy_ids(),
            AnnotationBackend::Cached(source) => source.legacy_ids(),
        }
    }

    fn is_fresh(&self) -> bool {
        match self {
            AnnotationBackend::Local(source) => source.is_fresh(),
            AnnotationBackend::Remote(source) => source.is_fresh(),
            AnnotationBackend::Cached(source) => source.is_fresh(),
        }
    }
}

fn read_override(path: &Path) -> Result<TsvTable, PeelError> {
    let table = TsvTable::from_path(path)?;
    if table.is_empty() {
        return Err(PeelError::EmptyData(format!(
            "The file is empty: {}",
            path.display()
        )));
    }
    Ok(table)
}

// Sinks

/// Writes artifacts below a run directory.
pub struct DirectorySink {
    root: Utf8PathBuf,
}

impl DirectorySink {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }
}

impl ArtifactSink for DirectorySink {
    fn emit(&mut self, artifact: Artifact) -> Result<(), PeelError> {
        let path = self.root.join(artifact.name());
        debug!(%path, "writing artifact");
        Store::write_bytes_atomic(&path, &artifact.to_bytes()?)
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub artifacts: Vec<Artifact>,
}

impl MemorySink {
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| artifact.name() == name)
    }
}

impl ArtifactSink for MemorySink {
    fn emit(&mut self, artifact: Artifact) -> Result<(), PeelError> {
        self.artifacts.push(artifact);
        Ok(())
    }
}

// Pipeline

pub const FINAL_TABLE: &str = "post-cutoff-proteome.tsv";
pub const FINAL_LIST: &str = "post-cutoff-proteome.txt";
pub const FINAL_RAW_TABLE: &str = "post-cutoff-proteome-raw.tsv";
pub const ROC_SUMMARY: &str = "plots/ROC_summary.json";
pub const CORRELATION: &str = "plots/correlation.tsv";
pub const RETRIEVED_DIR: &str = "retrieved_data";

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub compartment: Compartment,
    pub rows: usize,
    pub true_positive_rows: usize,
    pub false_positive_rows: usize,
    pub failed_id_mapping: usize,
    pub no_id_mapping: usize,
    pub tolerance: usize,
    pub threshold: usize,
    pub cutoffs: Vec<ColumnCutoff>,
    pub proteins: usize,
}

pub struct Pipeline<I, A, S> {
    pub identifiers: I,
    pub annotations: A,
    pub sink: S,
    pub compartment: Compartment,
    pub tolerance: usize,
    /// Archive retrieved annotations and mappings under `retrieved_data/`.
    pub save_retrieved: bool,
}

impl<I, A, S> Pipeline<I, A, S>
where
    I: IdentifierSource,
    A: AnnotationSource,
    S: ArtifactSink,
{
    pub async fn run(&mut self, dataset: &QuantitativeDataset) -> Result<RunSummary, PeelError> {
        self.sink.emit(Artifact::Table {
            name: CORRELATION.to_string(),
            table: dataset.correlation_table(),
        })?;

        let annotation_ids = self.annotations.legacy_ids();
        let legacy = merge_ids(&dataset.ids, &annotation_ids);
        let (resolved, tables) = tokio::try_join!(
            self.identifiers.resolve_identifiers(&legacy),
            self.annotations.fetch_annotations(self.compartment),
        )?;

        let (mut true_positive, mut false_positive) = tables.sets()?;
        if !annotation_ids.is_empty() {
            true_positive = true_positive.remap(&resolved.mapping);
            false_positive = false_positive.remap(&resolved.mapping);
        }
        if self.save_retrieved {
            self.archive(&resolved, &tables)?;
        }

        let data = ClassifiedDataset::merge(dataset, &resolved.mapping, &true_positive, &false_positive);
        let (call, passes) = ClassificationEngine::new(self.tolerance).call(&data)?;

        for (column, pass) in passes.iter().enumerate() {
            self.sink.emit(Artifact::Table {
                name: format!("plots/TPR_FPR_{}.tsv", pass.cutoff.column),
                table: pass.curve_table(&data, column),
            })?;
        }
        self.sink.emit(Artifact::Json {
            name: ROC_SUMMARY.to_string(),
            value: serde_json::to_value(&call.cutoffs)
                .map_err(|err| PeelError::Filesystem(err.to_string()))?,
        })?;
        self.sink.emit(Artifact::Table {
            name: FINAL_TABLE.to_string(),
            table: call.final_table(&data),
        })?;
        self.sink.emit(Artifact::Table {
            name: FINAL_RAW_TABLE.to_string(),
            table: call.raw_table(&data),
        })?;
        self.sink.emit(Artifact::Text {
            name: FINAL_LIST.to_string(),
            content: call.id_list(&data),
        })?;

        Ok(RunSummary {
            compartment: self.compartment,
            rows: data.len(),
            true_positive_rows: data.tp_count(),
            false_positive_rows: data.fp_count(),
            failed_id_mapping: resolved.failed_id_mapping,
            no_id_mapping: resolved.no_id_mapping.len(),
            tolerance: call.tolerance,
            threshold: call.threshold,
            cutoffs: call.cutoffs.clone(),
            proteins: call.selected.len(),
        })
    }

    fn archive(&mut self, resolved: &ResolvedIds, tables: &AnnotationTables) -> Result<(), PeelError> {
        if let Some(retrieved) = &resolved.retrieved {
            self.sink.emit(Artifact::Table {
                name: format!("{RETRIEVED_DIR}/latest_ids.tsv"),
                table: retrieved.clone(),
            })?;
        }
        if self.annotations.is_fresh() {
            for kind in [AnnotationKind::TruePositive, AnnotationKind::FalsePositive] {
                self.sink.emit(Artifact::Table {
                    name: format!("{RETRIEVED_DIR}/{}", kind.file_name()),
                    table: tables.table(kind).clone(),
                })?;
            }
        }
        Ok(())
    }
}

/// Dataset identifiers followed by any extra ones, without repeats.
fn merge_ids(dataset_ids: &[String], extra: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    dataset_ids
        .iter()
        .chain(extra)
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

