mod common;

use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{Local, TimeZone};
use tempfile::TempDir;

use common::{Lcg, MockUniprot, dataset, settings};
use peeling::app::App;
use peeling::config::{ClientSettings, LocalOverrides, RunSettings};
use peeling::domain::{AnnotationKind, Compartment};
use peeling::error::PeelError;
use peeling::pipeline::{
    Artifact, CORRELATION, FINAL_LIST, FINAL_RAW_TABLE, FINAL_TABLE, MemorySink, ROC_SUMMARY,
};
use peeling::store::Store;

const COLUMNS: [&str; 6] = ["c1_r1", "c1_r2", "c1_r3", "c2_r1", "c2_r2", "c2_r3"];

fn run_settings(controls: usize, replicates: usize, tolerance: usize) -> RunSettings {
    RunSettings {
        mass_file: PathBuf::from("unused.tsv"),
        controls,
        replicates,
        tolerance,
        compartment: Compartment::CellSurface,
        cache: false,
        reuse_cache: false,
        no_id_mapping: false,
        overrides: LocalOverrides::default(),
    }
}

fn store(dir: &TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("out"), root.join("cache"))
}

fn table_rows(sink: &MemorySink, name: &str) -> usize {
    match sink.get(name) {
        Some(Artifact::Table { table, .. }) => table.len(),
        other => panic!("expected table artifact {name}, got {other:?}"),
    }
}

/// 1000 rows over 2 controls x 3 replicates. Rows 0..90 are annotated
/// true positives with high values, rows 90..100 are unannotated but just
/// as high, rows 100..240 are annotated false positives with low values.
/// The last five rows have no mapping.
struct Scenario {
    lines: Vec<String>,
    mock: MockUniprot,
}

fn scenario() -> Scenario {
    let mut rng = Lcg::new(7);
    let mut lines = vec![format!("Accession\t{}", COLUMNS.join("\t"))];
    let mut builder = MockUniprot::builder();
    for i in 0..1000 {
        let legacy = format!("OLD{i:04}");
        let values = (0..COLUMNS.len())
            .map(|_| {
                let u = rng.next_unit();
                match i {
                    0 => 2.0,
                    1..90 => 2.0 + 2.0 * u,
                    90..100 => 2.5 + u,
                    100..240 => -2.0 + 2.0 * u,
                    _ => -0.5 + 2.0 * u,
                }
            })
            .map(|value| format!("{value:.6}"))
            .collect::<Vec<_>>();
        lines.push(format!("{legacy}\t{}", values.join("\t")));
        if i < 995 {
            builder = builder.map(&legacy, &format!("P{i:05}"));
        }
    }

    let true_positive = (0..90)
        .map(|i| format!("P{i:05}"))
        .chain((0..10).map(|i| format!("Q9{i:04}")))
        .collect::<Vec<_>>();
    let false_positive = (100..240)
        .map(|i| format!("P{i:05}"))
        .chain((0..10).map(|i| format!("Q8{i:04}")))
        .collect::<Vec<_>>();

    Scenario {
        lines,
        mock: builder
            .annotations(&true_positive, &false_positive)
            .page_rows(40)
            .build(),
    }
}

fn chunked() -> ClientSettings {
    ClientSettings {
        chunk_size: 300,
        ..settings()
    }
}

#[tokio::test]
async fn remote_run_selects_the_high_rows() {
    let dir = tempfile::tempdir().unwrap();
    let Scenario { lines, mock } = scenario();
    let data = dataset(&lines, 2, 3);
    let app = App::new(store(&dir), chunked(), mock.clone());

    let mut sink = MemorySink::default();
    let strict = app
        .run_with_sink(&run_settings(2, 3, 0), &data, &mut sink)
        .await
        .unwrap();

    assert_eq!(strict.rows, 1000);
    assert_eq!(strict.true_positive_rows, 90);
    assert_eq!(strict.false_positive_rows, 140);
    assert_eq!(strict.no_id_mapping, 5);
    assert_eq!(strict.failed_id_mapping, 0);
    assert_eq!(strict.cutoffs.len(), 6);
    assert!((80..=120).contains(&strict.proteins));
    assert_eq!(mock.requests_matching("/idmapping/run"), 4);

    let mut loose_sink = MemorySink::default();
    let loose = app
        .run_with_sink(&run_settings(2, 3, 1), &data, &mut loose_sink)
        .await
        .unwrap();
    assert!(loose.proteins >= strict.proteins);
    assert_eq!(loose.threshold, 5);

    assert_eq!(table_rows(&sink, FINAL_TABLE), strict.proteins);
    assert_eq!(table_rows(&sink, FINAL_RAW_TABLE), strict.proteins);
    assert_eq!(table_rows(&sink, CORRELATION), 6);
    for column in COLUMNS {
        assert_eq!(table_rows(&sink, &format!("plots/TPR_FPR_{column}.tsv")), 1000);
    }
    assert_matches!(sink.get(ROC_SUMMARY), Some(Artifact::Json { value, .. }) if value.as_array().map(Vec::len) == Some(6));
    let Some(Artifact::Text { content, .. }) = sink.get(FINAL_LIST) else {
        panic!("missing id list");
    };
    assert_eq!(content.split(',').count(), strict.proteins);
    assert!(content.starts_with("P00000,"));
    assert!(sink.get("retrieved_data/latest_ids.tsv").is_none());
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn local_settings(dir: &TempDir, no_id_mapping: bool) -> RunSettings {
    RunSettings {
        no_id_mapping,
        overrides: LocalOverrides {
            ids: Some(write(
                dir,
                "ids.tsv",
                "legacy\tcanonical\nOLD_A\tP1\nOLD_B\tP2\nOLD_C\tP3\nOLD_D\tP4\n",
            )),
            true_positive: Some(write(dir, "tp.tsv", "id\textra\nOLD_A\tx\n")),
            false_positive: Some(write(dir, "fp.tsv", "id\nOLD_D\n")),
        },
        ..run_settings(1, 1, 0)
    }
}

fn small_lines() -> Vec<String> {
    ["Accession\tsample", "OLD_A\t9", "OLD_B\t8", "OLD_C\t2", "OLD_D\t1"]
        .map(String::from)
        .to_vec()
}

#[tokio::test]
async fn local_files_are_remapped_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder().build();
    let app = App::new(store(&dir), settings(), mock.clone());
    let mut sink = MemorySink::default();

    let summary = app
        .run_with_sink(&local_settings(&dir, false), &dataset(&small_lines(), 1, 1), &mut sink)
        .await
        .unwrap();

    assert_eq!(mock.connects(), 0);
    assert_eq!(summary.true_positive_rows, 1);
    assert_eq!(summary.false_positive_rows, 1);
    assert_eq!(summary.proteins, 1);
    assert_matches!(sink.get(FINAL_LIST), Some(Artifact::Text { content, .. }) if content == "P1");
}

#[tokio::test]
async fn nomap_compares_local_ids_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder().build();
    let app = App::new(store(&dir), settings(), mock);
    let mut sink = MemorySink::default();

    let summary = app
        .run_with_sink(&local_settings(&dir, true), &dataset(&small_lines(), 1, 1), &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.true_positive_rows, 0);
    assert_eq!(summary.false_positive_rows, 0);
}

#[tokio::test]
async fn annotation_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder()
        .annotations(&["P1".to_string(), "P2".to_string()], &["P4".to_string()])
        .page_rows(1)
        .fail_search(AnnotationKind::TruePositive)
        .build();
    let app = App::new(store(&dir), settings(), mock.clone());
    let run = RunSettings {
        overrides: LocalOverrides {
            ids: Some(write(
                &dir,
                "ids.tsv",
                "legacy\tcanonical\nOLD_A\tP1\nOLD_B\tP2\nOLD_C\tP3\nOLD_D\tP4\n",
            )),
            ..LocalOverrides::default()
        },
        ..run_settings(1, 1, 0)
    };
    let mut sink = MemorySink::default();

    let result = app
        .run_with_sink(&run, &dataset(&small_lines(), 1, 1), &mut sink)
        .await;

    assert_matches!(result, Err(PeelError::UniprotStatus { status: 500, .. }));
    assert_eq!(mock.requests_matching("/idmapping/run"), 0);
    assert!(sink.get(FINAL_TABLE).is_none());
    assert!(sink.get(FINAL_LIST).is_none());
}

#[tokio::test]
async fn protein_in_both_sets_is_counted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder()
        .map("OLD_A", "P1")
        .map("OLD_B", "P2")
        .map("OLD_C", "P3")
        .map("OLD_D", "P4")
        .annotations(&["P1".to_string(), "P2".to_string()], &["P2".to_string(), "P4".to_string()])
        .build();
    let app = App::new(store(&dir), settings(), mock);
    let mut sink = MemorySink::default();

    let summary = app
        .run_with_sink(&run_settings(1, 1, 0), &dataset(&small_lines(), 1, 1), &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.true_positive_rows, 2);
    assert_eq!(summary.false_positive_rows, 2);
    // P2 adds TPR and FPR equally, so the first maximum stays at P1.
    assert_eq!(summary.cutoffs[0].rank, 0);
    assert_matches!(sink.get(FINAL_LIST), Some(Artifact::Text { content, .. }) if content == "P1");
}

#[tokio::test]
async fn reused_cache_skips_annotation_queries() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder()
        .map("OLD_A", "P1")
        .map("OLD_D", "P4")
        .annotations(&["P1".to_string()], &["P4".to_string()])
        .build();
    let app = App::new(store(&dir), settings(), mock.clone());
    let run = RunSettings {
        cache: true,
        reuse_cache: true,
        ..run_settings(1, 1, 0)
    };
    let data = dataset(&small_lines(), 1, 1);

    let mut first = MemorySink::default();
    app.run_with_sink(&run, &data, &mut first).await.unwrap();
    let searches = mock.requests_matching("/uniprotkb/search");
    assert!(first.get("retrieved_data/annotation_true_positive.tsv").is_some());
    assert!(first.get("retrieved_data/latest_ids.tsv").is_some());

    let mut second = MemorySink::default();
    let summary = app.run_with_sink(&run, &data, &mut second).await.unwrap();

    assert_eq!(mock.requests_matching("/uniprotkb/search"), searches);
    assert_eq!(mock.connects(), 3);
    assert_eq!(summary.true_positive_rows, 1);
    assert!(second.get("retrieved_data/annotation_true_positive.tsv").is_none());
    let cached = app
        .store()
        .annotation_cache_dir(Compartment::CellSurface, true)
        .join("annotation_true_positive.tsv");
    assert!(cached.as_std_path().exists());
}

#[tokio::test]
async fn directory_run_writes_the_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder()
        .map("OLD_A", "P1")
        .annotations(&["P1".to_string()], &["OLD_D".to_string()])
        .build();
    let app = App::new(store(&dir), settings(), mock);
    let run = RunSettings {
        mass_file: write(&dir, "mass.tsv", &(small_lines().join("\n") + "\n")),
        ..run_settings(1, 1, 0)
    };
    let started = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

    let report = app.run(&run, started).await.unwrap();

    let run_dir = Utf8PathBuf::from(report.run_dir.clone());
    assert!(run_dir.ends_with("2024-05-01_09-30-00"));
    for name in [
        "log.txt",
        FINAL_TABLE,
        FINAL_LIST,
        FINAL_RAW_TABLE,
        ROC_SUMMARY,
        CORRELATION,
        "plots/TPR_FPR_sample.tsv",
    ] {
        assert!(run_dir.join(name).as_std_path().exists(), "missing {name}");
    }
    let log = fs::read_to_string(run_dir.join("log.txt").as_std_path()).unwrap();
    assert!(log.contains("tolerance: 0"));
    let final_table = fs::read_to_string(run_dir.join(FINAL_TABLE).as_std_path()).unwrap();
    assert!(final_table.starts_with("Entry\tGene Names\tProtein names\tOrganism\tLength\n"));
    assert!(final_table.contains("P1\tGENEP1\tProtein P1\tHomo sapiens (Human)\t100"));
}

#[tokio::test]
async fn invalid_input_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockUniprot::builder().build();
    let app = App::new(store(&dir), settings(), mock.clone());
    let started = Local::now();

    let wrong_shape = RunSettings {
        mass_file: write(&dir, "mass.tsv", "Accession\ta\tb\nX\t1\t2\n"),
        ..run_settings(1, 1, 0)
    };
    assert_matches!(
        app.run(&wrong_shape, started).await,
        Err(PeelError::ColumnCount {
            expected: 2,
            actual: 3
        })
    );

    let ragged = RunSettings {
        mass_file: write(&dir, "mass.tsv", "Accession\ta\nX\t1\nY\t2\t3\n"),
        ..run_settings(1, 1, 0)
    };
    assert_matches!(
        app.run(&ragged, started).await,
        Err(PeelError::RowWidth { line: 3, .. })
    );

    let too_tolerant = RunSettings {
        mass_file: write(&dir, "mass.tsv", "Accession\ta\nX\t1\n"),
        ..run_settings(1, 1, 2)
    };
    assert_matches!(
        app.run(&too_tolerant, started).await,
        Err(PeelError::ToleranceOutOfRange { .. })
    );
    assert_eq!(mock.connects(), 0);
    assert!(!dir.path().join("out").exists());
}
