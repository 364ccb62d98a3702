use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peeling::app::{App, RunReport};
use peeling::config::{ConfigLoader, LocalOverrides, RunSettings};
use peeling::domain::Compartment;
use peeling::error::PeelError;
use peeling::output::{JsonOutput, OutputMode};
use peeling::store::Store;
use peeling::uniprot::UniprotConnector;

#[derive(Parser)]
#[command(name = "peeling")]
#[command(about = "Ratiometric proteomics cutoff analysis against UniProt compartment annotations")]
#[command(version, author)]
struct Cli {
    /// Mass spec data, e.g. data/mass_spec_data.tsv
    mass: PathBuf,

    /// Number of controls
    controls: usize,

    /// Number of replicates for each control
    replicates: usize,

    /// Tolerance of non-included columns
    #[arg(short, long, default_value_t = 0)]
    tolerance: usize,

    /// Directory to store output results, defaults to the working directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Local id mapping file, e.g. data/id_mapping.tsv
    #[arg(short, long)]
    ids: Option<PathBuf>,

    /// Local true-positive annotation file
    #[arg(short, long)]
    surface: Option<PathBuf>,

    /// Local false-positive annotation file
    #[arg(short, long)]
    cyto: Option<PathBuf>,

    /// Skip id mapping for local annotation files
    #[arg(short, long)]
    nomap: bool,

    /// Save the data retrieved from UniProt
    #[arg(short = 'a', long)]
    cache: bool,

    /// Reuse annotations cached by an earlier run
    #[arg(long)]
    reuse_cache: bool,

    #[arg(long, value_enum, default_value_t = Compartment::CellSurface)]
    compartment: Compartment,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    non_interactive: bool,

    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(peel) = report.downcast_ref::<PeelError>() {
            return ExitCode::from(map_exit_code(peel));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PeelError) -> u8 {
    match error {
        _ if error.is_remote() => 3,
        PeelError::InvalidInput(_)
        | PeelError::EmptyData(_)
        | PeelError::ColumnCount { .. }
        | PeelError::RowWidth { .. }
        | PeelError::InvalidValue { .. }
        | PeelError::InvalidCount(_)
        | PeelError::ToleranceOutOfRange { .. }
        | PeelError::UnknownCompartment(_)
        | PeelError::MissingColumn(_)
        | PeelError::Tsv(_)
        | PeelError::ConfigRead(_)
        | PeelError::ConfigParse(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let client = ConfigLoader::resolve(cli.config.as_deref())?;
    let output = match cli.output {
        Some(path) => path,
        None => std::env::current_dir().into_diagnostic()?,
    };
    let output = Utf8PathBuf::from_path_buf(output)
        .map_err(|_| PeelError::Filesystem("output path is not valid UTF-8".to_string()))?;
    let store = Store::new(&output)?;

    let settings = RunSettings {
        mass_file: cli.mass,
        controls: cli.controls,
        replicates: cli.replicates,
        tolerance: cli.tolerance,
        compartment: cli.compartment,
        cache: cli.cache,
        reuse_cache: cli.reuse_cache,
        no_id_mapping: cli.nomap,
        overrides: LocalOverrides {
            ids: cli.ids,
            true_positive: cli.surface,
            false_positive: cli.cyto,
        },
    };

    let started = chrono::Local::now();
    info!(compartment = settings.compartment.long_name(), "analysis starts");
    let app = App::new(store, client.clone(), UniprotConnector::new(client));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let report = runtime.block_on(app.run(&settings, started))?;
    info!(elapsed_ms = report.elapsed_ms, "analysis finished");

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Interactive => print_run_summary(&report),
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    let summary = &report.summary;

    println!("{cyan}peeling summary ({}){reset}", summary.compartment.long_name());
    println!(
        "{green}rows: {}  true positives: {}  false positives: {}{reset}",
        summary.rows, summary.true_positive_rows, summary.false_positive_rows
    );
    if summary.failed_id_mapping > 0 || summary.no_id_mapping > 0 {
        println!(
            "{yellow}id mapping: {} failed, {} without a match{reset}",
            summary.failed_id_mapping, summary.no_id_mapping
        );
    }
    for cutoff in &summary.cutoffs {
        println!(
            "{cyan}  {} cutoff at rank {} ({}): TPR {:.3} FPR {:.3} AUC {:.3}{reset}",
            cutoff.column, cutoff.rank, cutoff.entry, cutoff.tpr, cutoff.fpr, cutoff.auc
        );
    }
    println!(
        "{green}{} proteins kept (tolerance {}, threshold {}){reset}",
        summary.proteins, summary.tolerance, summary.threshold
    );
    println!("{green}results saved at {}{reset}", report.run_dir);
}
