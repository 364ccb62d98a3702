#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::{Future, ready};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::Url;

use peeling::config::ClientSettings;
use peeling::dataset::QuantitativeDataset;
use peeling::domain::{AnnotationKind, Compartment};
use peeling::error::PeelError;
use peeling::table::TsvTable;
use peeling::uniprot::{Connector, HttpReply, Transport};

pub const API: &str = "http://uniprot.test";

const RESULT_HEADER: &str =
    "From\tEntry\tEntry Name\tReviewed\tGene Names\tProtein names\tOrganism\tLength";
const ANNOTATION_HEADER: &str = "Entry\tEntry Name\tProtein names";

pub fn settings() -> ClientSettings {
    ClientSettings {
        api_url: API.to_string(),
        poll_interval_ms: 1,
        ..ClientSettings::default()
    }
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[derive(Default)]
struct Job {
    ids: Vec<String>,
    polls: u32,
}

#[derive(Default)]
struct Inner {
    mapping: HashMap<String, String>,
    failing: HashSet<String>,
    failing_search: Option<AnnotationKind>,
    panicking: HashSet<String>,
    true_positive: Vec<String>,
    false_positive: Vec<String>,
    page_rows: usize,
    running_polls: u32,
    jobs: Mutex<Vec<Job>>,
    requests: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

/// An in-process stand-in for the UniProt REST API. It serves id-mapping
/// jobs, paginated gzip TSV results and the annotation searches.
#[derive(Clone)]
pub struct MockUniprot {
    inner: Arc<Inner>,
}

pub struct MockBuilder {
    inner: Inner,
}

impl MockBuilder {
    pub fn map(mut self, legacy: &str, canonical: &str) -> Self {
        self.inner
            .mapping
            .insert(legacy.to_string(), canonical.to_string());
        self
    }

    /// Any job containing `id` ends with status `ERROR`.
    pub fn fail_on(mut self, id: &str) -> Self {
        self.inner.failing.insert(id.to_string());
        self
    }

    /// Searches for `kind` answer 500 from the second page on.
    pub fn fail_search(mut self, kind: AnnotationKind) -> Self {
        self.inner.failing_search = Some(kind);
        self
    }

    /// Submitting a job containing `id` panics inside the transport.
    pub fn panic_on(mut self, id: &str) -> Self {
        self.inner.panicking.insert(id.to_string());
        self
    }

    pub fn annotations(mut self, true_positive: &[String], false_positive: &[String]) -> Self {
        self.inner.true_positive = true_positive.to_vec();
        self.inner.false_positive = false_positive.to_vec();
        self
    }

    pub fn page_rows(mut self, rows: usize) -> Self {
        self.inner.page_rows = rows;
        self
    }

    pub fn running_polls(mut self, polls: u32) -> Self {
        self.inner.running_polls = polls;
        self
    }

    pub fn build(self) -> MockUniprot {
        MockUniprot {
            inner: Arc::new(self.inner),
        }
    }
}

impl MockUniprot {
    pub fn builder() -> MockBuilder {
        MockBuilder {
            inner: Inner {
                page_rows: 500,
                ..Inner::default()
            },
        }
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn requests_matching(&self, needle: &str) -> usize {
        self.inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains(needle))
            .count()
    }

    fn record(&self, url: &str) {
        self.inner.requests.lock().unwrap().push(url.to_string());
    }

    fn answer_post(&self, url: &str, form: &[(&str, String)]) -> HttpReply {
        let ids: Vec<String> = form
            .iter()
            .find(|(key, _)| *key == "ids")
            .map(|(_, value)| value.split(',').map(|id| id.to_string()).collect())
            .unwrap_or_default();
        if let Some(id) = ids.iter().find(|id| self.inner.panicking.contains(*id)) {
            panic!("transport crashed on {id}");
        }
        self.record(url);
        if url != format!("{API}/idmapping/run") {
            return not_found();
        }
        let mut jobs = self.inner.jobs.lock().unwrap();
        jobs.push(Job { ids, polls: 0 });
        json_reply(&format!(r#"{{"jobId": "job{}"}}"#, jobs.len() - 1))
    }

    fn answer_get(&self, url: &str) -> HttpReply {
        self.record(url);
        let Ok(parsed) = Url::parse(url) else {
            return not_found();
        };
        let query = parsed
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect::<HashMap<_, _>>();
        let cursor = query
            .get("cursor")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0usize);
        let path = parsed.path().to_string();

        if let Some(job) = path.strip_prefix("/idmapping/status/") {
            return self.answer_status(job);
        }
        if let Some(job) = path.strip_prefix("/idmapping/details/") {
            return json_reply(&format!(
                r#"{{"redirectURL": "{API}/idmapping/uniprotkb/results/{job}"}}"#
            ));
        }
        if let Some(job) = path.strip_prefix("/idmapping/uniprotkb/results/") {
            let rows = self.result_rows(job);
            let next = format!("{API}/idmapping/uniprotkb/results/{job}?format=tsv");
            return self.page(RESULT_HEADER, &rows, cursor, &next);
        }
        if path == "/uniprotkb/search" {
            let Some(kind) = search_kind(&query) else {
                return not_found();
            };
            if self.inner.failing_search == Some(kind) && cursor > 0 {
                return HttpReply {
                    status: 500,
                    body: br#"{"messages":["boom"]}"#.to_vec(),
                    ..HttpReply::default()
                };
            }
            let ids = match kind {
                AnnotationKind::TruePositive => &self.inner.true_positive,
                AnnotationKind::FalsePositive => &self.inner.false_positive,
            };
            let rows = ids
                .iter()
                .map(|id| format!("{id}\t{id}_HUMAN\tProtein {id}"))
                .collect::<Vec<_>>();
            let next = format!("{API}/uniprotkb/search?kind={}", kind.label());
            return self.page(ANNOTATION_HEADER, &rows, cursor, &next);
        }
        not_found()
    }

    fn answer_status(&self, job: &str) -> HttpReply {
        let Some(index) = job.strip_prefix("job").and_then(|n| n.parse::<usize>().ok()) else {
            return not_found();
        };
        let mut jobs = self.inner.jobs.lock().unwrap();
        let Some(state) = jobs.get_mut(index) else {
            return not_found();
        };
        state.polls += 1;
        if state.ids.iter().any(|id| self.inner.failing.contains(id)) {
            return json_reply(r#"{"jobStatus": "ERROR"}"#);
        }
        if state.polls <= self.inner.running_polls {
            return json_reply(r#"{"jobStatus": "RUNNING"}"#);
        }
        // Even jobs redirect straight to their results, odd ones report
        // completion and leave the location to the details endpoint.
        if index % 2 == 0 {
            HttpReply {
                status: 303,
                location: Some(format!("/idmapping/uniprotkb/results/{job}")),
                ..HttpReply::default()
            }
        } else {
            json_reply(r#"{"jobStatus": "FINISHED"}"#)
        }
    }

    fn result_rows(&self, job: &str) -> Vec<String> {
        let index = job
            .strip_prefix("job")
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let jobs = self.inner.jobs.lock().unwrap();
        let Some(state) = jobs.get(index) else {
            return Vec::new();
        };
        state
            .ids
            .iter()
            .filter_map(|id| {
                self.inner.mapping.get(id).map(|entry| {
                    format!(
                        "{id}\t{entry}\t{entry}_HUMAN\treviewed\tGENE{entry}\tProtein {entry}\tHomo sapiens (Human)\t100"
                    )
                })
            })
            .collect()
    }

    fn page(&self, header: &str, rows: &[String], cursor: usize, next: &str) -> HttpReply {
        let end = (cursor + self.inner.page_rows).min(rows.len());
        let mut text = format!("{header}\n");
        for row in &rows[cursor.min(end)..end] {
            text.push_str(row);
            text.push('\n');
        }
        let link = (end < rows.len()).then(|| format!(r#"<{next}&cursor={end}>; rel="next""#));
        HttpReply {
            status: 200,
            location: None,
            link,
            body: gzip(&text),
        }
    }
}

fn search_kind(query: &HashMap<String, String>) -> Option<AnnotationKind> {
    let kinds = [AnnotationKind::TruePositive, AnnotationKind::FalsePositive];
    if let Some(label) = query.get("kind") {
        return kinds.into_iter().find(|kind| kind.label() == label.as_str());
    }
    let expression = query.get("query")?;
    let compartments = [
        Compartment::CellSurface,
        Compartment::Mitochondria,
        Compartment::Nucleus,
    ];
    compartments.into_iter().find_map(|compartment| {
        kinds
            .into_iter()
            .find(|kind| compartment.query(*kind) == *expression)
    })
}

fn json_reply(body: &str) -> HttpReply {
    HttpReply {
        status: 200,
        body: body.as_bytes().to_vec(),
        ..HttpReply::default()
    }
}

fn not_found() -> HttpReply {
    HttpReply {
        status: 404,
        body: b"not found".to_vec(),
        ..HttpReply::default()
    }
}

impl Transport for MockUniprot {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpReply, PeelError>> + Send {
        ready(Ok(self.answer_get(url)))
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> impl Future<Output = Result<HttpReply, PeelError>> + Send {
        ready(Ok(self.answer_post(url, form)))
    }
}

impl Connector for MockUniprot {
    type Transport = MockUniprot;

    fn connect(&self) -> Result<MockUniprot, PeelError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

/// Deterministic uniform numbers for synthetic datasets.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_unit(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

pub fn dataset(lines: &[String], controls: usize, replicates: usize) -> QuantitativeDataset {
    let table = TsvTable::from_lines(lines).unwrap();
    QuantitativeDataset::from_table(&table, controls, replicates).unwrap()
}
