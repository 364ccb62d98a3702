use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::config::{ClientSettings, RunSettings};
use crate::dataset::QuantitativeDataset;
use crate::error::PeelError;
use crate::pipeline::{
    AnnotationBackend, ArtifactSink, CachedAnnotations, DirectorySink, IdentifierBackend,
    LocalAnnotations, LocalIdentifiers, Pipeline, RemoteAnnotations, RemoteIdentifiers, RunSummary,
};
use crate::store::Store;
use crate::table::TsvTable;
use crate::uniprot::Connector;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_dir: String,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub summary: RunSummary,
}

#[derive(Clone)]
pub struct App<C: Connector + Clone> {
    store: Store,
    client: ClientSettings,
    connector: C,
}

impl<C: Connector + Clone> App<C> {
    pub fn new(store: Store, client: ClientSettings, connector: C) -> Self {
        Self {
            store,
            client,
            connector,
        }
    }

    /// Validate inputs, lay out a fresh run directory and run the pipeline
    /// into it.
    pub async fn run(&self, run: &RunSettings, started: DateTime<Local>) -> Result<RunReport, PeelError> {
        let start = Instant::now();
        run.validate()?;
        let dataset = load_dataset(run)?;

        let run_dir = self.store.create_run_dir(started)?;
        Store::write_run_log(&run_dir, run, &self.client)?;
        info!(run_dir = %run_dir, "writing results");

        let mut sink = DirectorySink::new(run_dir.clone());
        let summary = self.run_with_sink(run, &dataset, &mut sink).await?;
        Ok(RunReport {
            run_dir: run_dir.to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            summary,
        })
    }

    /// Run the pipeline over an already loaded dataset.
    pub async fn run_with_sink<S: ArtifactSink>(
        &self,
        run: &RunSettings,
        dataset: &QuantitativeDataset,
        sink: &mut S,
    ) -> Result<RunSummary, PeelError> {
        let mut pipeline = Pipeline {
            identifiers: self.identifiers(run)?,
            annotations: self.annotations(run)?,
            sink,
            compartment: run.compartment,
            tolerance: run.tolerance,
            save_retrieved: run.cache,
        };
        pipeline.run(dataset).await
    }

    fn identifiers(&self, run: &RunSettings) -> Result<IdentifierBackend<C>, PeelError> {
        Ok(match &run.overrides.ids {
            Some(path) => IdentifierBackend::Local(LocalIdentifiers::from_path(path)?),
            None => IdentifierBackend::Remote(RemoteIdentifiers::new(
                self.connector.clone(),
                self.client.clone(),
            )),
        })
    }

    fn annotations(&self, run: &RunSettings) -> Result<AnnotationBackend<C>, PeelError> {
        if let (Some(true_positive), Some(false_positive)) =
            (&run.overrides.true_positive, &run.overrides.false_positive)
        {
            return Ok(AnnotationBackend::Local(LocalAnnotations::from_paths(
                true_positive,
                false_positive,
                !run.no_id_mapping,
            )?));
        }
        let remote = RemoteAnnotations::new(
            self.connector.clone(),
            self.client.clone(),
            run.compartment,
            run.cache,
        );
        if run.reuse_cache {
            let dir = self.store.annotation_cache_dir(run.compartment, run.cache);
            return Ok(AnnotationBackend::Cached(CachedAnnotations::new(dir, remote)));
        }
        Ok(AnnotationBackend::Remote(remote))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

pub fn load_dataset(run: &RunSettings) -> Result<QuantitativeDataset, PeelError> {
    let table = TsvTable::from_path(&run.mass_file)?;
    QuantitativeDataset::from_table(&table, run.controls, run.replicates)
}
