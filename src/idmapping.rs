//! Legacy-to-canonical accession mapping through UniProt's asynchronous
//! id-mapping jobs.
//!
//! Identifiers are split into fixed-size chunks. Each chunk runs its own
//! job (`submit → poll → fetch results`) on a shared transport, and a chunk
//! that fails for any reason is reported as a failure count instead of
//! aborting its siblings.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::ClientSettings;
use crate::error::PeelError;
use crate::fetch::{ChunkedBatchFetcher, results_url};
use crate::table::TsvTable;
use crate::uniprot::{Connector, HttpReply, Transport, ensure_success};

pub const FROM_DB: &str = "UniProtKB_AC-ID";
pub const TO_DB: &str = "UniProtKB";

/// Server-supplied columns that are not part of the mapping contract.
const DROPPED_COLUMNS: [&str; 2] = ["Entry Name", "Reviewed"];

pub fn chunk_ids(ids: &[String], size: usize) -> Vec<Vec<String>> {
    ids.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// What a single status poll told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Redirect(String),
    Status(String),
    Finished,
}

impl PollOutcome {
    pub fn from_reply(reply: &HttpReply) -> Result<Self, PeelError> {
        if reply.is_redirect() {
            return reply
                .location
                .clone()
                .map(PollOutcome::Redirect)
                .ok_or_else(|| {
                    PeelError::UniprotPayload("redirect without location header".to_string())
                });
        }
        let body = reply.json()?;
        if let Some(status) = body.get("jobStatus").and_then(|v| v.as_str()) {
            return Ok(PollOutcome::Status(status.to_string()));
        }
        if body.get("results").is_some() || body.get("failedIds").is_some() {
            return Ok(PollOutcome::Finished);
        }
        Err(PeelError::UniprotPayload(format!(
            "unrecognised job status payload: {body}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted { job_id: String },
    Polling { job_id: String, attempts: u32 },
    Redirected(String),
    Ready { job_id: String },
    Failed { job_id: String, status: String },
    TimedOut { job_id: String, attempts: u32 },
}

impl JobState {
    pub fn submitted(job_id: impl Into<String>) -> Self {
        JobState::Submitted {
            job_id: job_id.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Submitted { .. } | JobState::Polling { .. })
    }

    /// Fold one poll outcome into the state. Terminal states are absorbing.
    pub fn advance(self, outcome: PollOutcome, max_attempts: u32) -> JobState {
        let (job_id, attempts) = match self {
            JobState::Submitted { job_id } => (job_id, 1),
            JobState::Polling { job_id, attempts } => (job_id, attempts + 1),
            terminal => return terminal,
        };
        match outcome {
            PollOutcome::Redirect(location) => JobState::Redirected(location),
            PollOutcome::Finished => JobState::Ready { job_id },
            PollOutcome::Status(status) => match status.as_str() {
                "FINISHED" => JobState::Ready { job_id },
                "NEW" | "RUNNING" if attempts >= max_attempts => {
                    JobState::TimedOut { job_id, attempts }
                }
                "NEW" | "RUNNING" => JobState::Polling { job_id, attempts },
                _ => JobState::Failed { job_id, status },
            },
        }
    }
}

/// Concatenated mapping results plus what could not be mapped.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub table: TsvTable,
    /// Number of identifiers in chunks whose job failed outright.
    pub failed_id_mapping: usize,
    /// Identifiers sent in a successful chunk that came back without a match.
    pub no_id_mapping: BTreeSet<String>,
    pub chunks: usize,
}

pub struct IdResolver<C: Connector> {
    connector: C,
    settings: ClientSettings,
}

impl<C: Connector> IdResolver<C> {
    pub fn new(connector: C, settings: ClientSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    pub async fn resolve(&self, ids: &[String]) -> Result<Resolution, PeelError> {
        let start = Instant::now();
        let chunks = chunk_ids(ids, self.settings.chunk_size);
        info!(
            ids = ids.len(),
            chunks = chunks.len(),
            chunk_size = self.settings.chunk_size,
            "communicating with UniProt for id mapping"
        );

        let transport = Arc::new(self.connector.connect()?);
        let mut tasks = JoinSet::new();
        for (index, chunk) in chunks.iter().cloned().enumerate() {
            let transport = Arc::clone(&transport);
            let settings = self.settings.clone();
            tasks.spawn(async move {
                let outcome = resolve_chunk(transport.as_ref(), &settings, &chunk).await;
                (index, outcome)
            });
        }

        let mut resolution = Resolution {
            chunks: chunks.len(),
            ..Resolution::default()
        };
        let mut retrieved = 0usize;
        let mut pending = (0..chunks.len()).collect::<BTreeSet<_>>();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    error!(error = %err, "id mapping task aborted");
                    continue;
                }
            };
            pending.remove(&index);
            let chunk = &chunks[index];
            match outcome {
                Ok(table) => {
                    retrieved += table.len();
                    resolution.no_id_mapping.extend(unmapped(chunk, &table));
                    resolution.table.concat(table);
                }
                Err(err) => {
                    error!(chunk = index, size = chunk.len(), error = %err, "id mapping chunk failed");
                    resolution.failed_id_mapping += chunk.len();
                }
            }
        }
        drop(transport);
        // Chunks whose task never reported back.
        for index in pending {
            resolution.failed_id_mapping += chunks[index].len();
        }

        info!(
            retrieved,
            no_mapping = resolution.no_id_mapping.len(),
            failed = resolution.failed_id_mapping,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "id mapping finished"
        );
        Ok(resolution)
    }
}

fn unmapped(chunk: &[String], table: &TsvTable) -> Vec<String> {
    let mapped = table
        .column("From")
        .map(|column| column.into_iter().collect::<BTreeSet<_>>())
        .unwrap_or_default();
    chunk
        .iter()
        .filter(|id| !mapped.contains(id.as_str()))
        .cloned()
        .collect()
}

pub async fn resolve_chunk<T: Transport>(
    transport: &T,
    settings: &ClientSettings,
    chunk: &[String],
) -> Result<TsvTable, PeelError> {
    let job_id = submit_job(transport, &settings.api_url, chunk).await?;
    let location = await_results(transport, settings, &job_id).await?;
    let url = results_url(&location, settings.page_size)?;
    let mut table = ChunkedBatchFetcher::new(transport)
        .fetch_table(&url, true)
        .await?;
    if !table.is_empty() {
        table.drop_columns(&DROPPED_COLUMNS);
    }
    debug!(%job_id, retrieved = table.len(), "chunk retrieved");
    Ok(table)
}

async fn submit_job<T: Transport>(
    transport: &T,
    api_url: &str,
    ids: &[String],
) -> Result<String, PeelError> {
    let form = [
        ("from", FROM_DB.to_string()),
        ("to", TO_DB.to_string()),
        ("ids", ids.join(",")),
    ];
    let reply = ensure_success(
        transport
            .post_form(&format!("{api_url}/idmapping/run"), &form)
            .await?,
    )?;
    reply
        .json()?
        .get("jobId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| PeelError::UniprotPayload("submission reply without jobId".to_string()))
}

/// Poll a job until it yields a results location or gives up.
async fn await_results<T: Transport>(
    transport: &T,
    settings: &ClientSettings,
    job_id: &str,
) -> Result<String, PeelError> {
    let status_url = format!("{}/idmapping/status/{job_id}", settings.api_url);
    let mut state = JobState::submitted(job_id);
    loop {
        state = match state {
            pending @ (JobState::Submitted { .. } | JobState::Polling { .. }) => {
                if matches!(pending, JobState::Polling { .. }) {
                    debug!(%job_id, interval_ms = settings.poll_interval_ms, "job running, retrying");
                    tokio::time::sleep(settings.poll_interval()).await;
                }
                let reply = ensure_success(transport.get(&status_url).await?)?;
                pending.advance(PollOutcome::from_reply(&reply)?, settings.max_poll_attempts)
            }
            JobState::Redirected(location) => {
                return Ok(absolute_location(&settings.api_url, &location));
            }
            JobState::Ready { job_id } => {
                return details_location(transport, &settings.api_url, &job_id).await;
            }
            JobState::Failed { job_id, status } => {
                return Err(PeelError::JobFailed { job_id, status });
            }
            JobState::TimedOut { job_id, attempts } => {
                return Err(PeelError::PollExhausted { job_id, attempts });
            }
        };
    }
}

async fn details_location<T: Transport>(
    transport: &T,
    api_url: &str,
    job_id: &str,
) -> Result<String, PeelError> {
    let reply = ensure_success(
        transport
            .get(&format!("{api_url}/idmapping/details/{job_id}"))
            .await?,
    )?;
    reply
        .json()?
        .get("redirectURL")
        .and_then(|v| v.as_str())
        .map(|location| absolute_location(api_url, location))
        .ok_or_else(|| PeelError::UniprotPayload("job details without redirectURL".to_string()))
}

fn absolute_location(api_url: &str, location: &str) -> String {
    if location.starts_with('/') {
        format!("{api_url}{location}")
    } else {
        location.to_string()
    }
}
