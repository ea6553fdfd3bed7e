use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_geo_matrix::config::{ConfigLoader, Settings};
use kira_geo_matrix::domain::{PlatformAccession, SeriesAccession};
use kira_geo_matrix::error::GeoError;
use kira_geo_matrix::filter::{EqtlFilter, FilterOptions};
use kira_geo_matrix::model::{Repository, Study};
use kira_geo_matrix::output::{JsonOutput, RowLayout, RowWriter, StudySummary};

#[derive(Parser)]
#[command(name = "kira-gm")]
#[command(about = "Fetch, align and filter GEO series matrix studies")]
#[command(version, author)]
struct Cli {
    /// Path to a kira-gm.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Neither read nor write the download cache.
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show study metadata as JSON")]
    Info(StudyArgs),
    #[command(about = "Write the aligned, unfiltered rows of a study")]
    Rows(RowsArgs),
    #[command(about = "Write the gene-indexed, variance-filtered rows of an expression study")]
    Filter(FilterArgs),
}

#[derive(Args, Clone)]
struct StudyArgs {
    /// Series accession, e.g. GSE25935.
    study: SeriesAccession,

    /// Restrict a multi-platform study to one platform.
    #[arg(long)]
    platform: Option<PlatformAccession>,
}

#[derive(Args, Clone)]
struct RowsArgs {
    #[command(flatten)]
    study: StudyArgs,

    #[arg(long)]
    output: Option<String>,
}

#[derive(Args, Clone)]
struct FilterArgs {
    #[command(flatten)]
    study: StudyArgs,

    /// Fraction of gene rows to keep, by descending standard deviation.
    #[arg(long)]
    percentile: Option<f64>,

    /// Keep replicate columns separate.
    #[arg(long)]
    no_merge: bool,

    #[arg(long, default_value_t = RowLayout::Raw)]
    format: RowLayout,

    #[arg(long)]
    output: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(geo) = report.downcast_ref::<GeoError>() {
            return ExitCode::from(map_exit_code(geo));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeoError) -> u8 {
    match error {
        GeoError::MalformedData(_)
        | GeoError::NotPopulated(_)
        | GeoError::StudyTypeMismatch { .. }
        | GeoError::SuperStudyAccess { .. }
        | GeoError::NoGeneColumn(_)
        | GeoError::ColumnMerge(_)
        | GeoError::InvalidAccession(_)
        | GeoError::InvalidPercentile(_)
        | GeoError::InvalidPattern { .. }
        | GeoError::ConfigRead(_)
        | GeoError::ConfigParse(_) => 2,
        GeoError::FetchHttp { .. } | GeoError::FetchStatus { .. } => 3,
        GeoError::Io(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = ConfigLoader::resolve(cli.config.as_deref())?;
    if cli.no_cache {
        settings.use_cache = false;
        settings.write_cache = false;
    }

    match cli.command {
        Commands::Info(args) => run_info(args, settings),
        Commands::Rows(args) => run_rows(args, settings),
        Commands::Filter(args) => run_filter(args, settings),
    }
}

fn run_info(args: StudyArgs, settings: Settings) -> miette::Result<()> {
    let repo = Repository::from_settings(settings)?;
    let study = repo.populated_study(args.study, args.platform)?;
    JsonOutput::print_summary(&StudySummary::from_study(&study)).into_diagnostic()
}

fn run_rows(args: RowsArgs, settings: Settings) -> miette::Result<()> {
    let repo = Repository::from_settings(settings)?;
    let mut study = repo.populated_study(args.study.study, args.study.platform)?;
    let study = leaf_study(&mut study)?;

    let rows = study.rows(&repo)?;
    let mut writer = RowWriter::new(open_output(args.output.as_deref())?, RowLayout::Raw);
    writer
        .write_row(study.column_titles())
        .into_diagnostic()?;
    for row in rows {
        writer.write_row(&row?).into_diagnostic()?;
    }
    info!("Wrote {} rows.", writer.rows_written());
    writer.finish().into_diagnostic()?;
    Ok(())
}

fn run_filter(args: FilterArgs, mut settings: Settings) -> miette::Result<()> {
    if let Some(percentile) = args.percentile {
        settings.set_percentile(percentile)?;
    }
    if args.no_merge {
        settings.merge_columns = false;
    }
    let options = FilterOptions::from_settings(&settings);
    let repo = Repository::from_settings(settings)?;
    let mut study = repo.populated_study(args.study.study, args.study.platform)?;
    let study = leaf_study(&mut study)?;

    let run = EqtlFilter::new(study, options)?.run(&repo)?;
    let mut writer = RowWriter::new(open_output(args.output.as_deref())?, args.format);
    for row in run.rows()? {
        writer.write_row(&row?).into_diagnostic()?;
    }
    info!("Wrote {} rows.", writer.rows_written());
    writer.finish().into_diagnostic()?;
    Ok(())
}

/// The study itself, or its only substudy when it was split into exactly one.
fn leaf_study(study: &mut Study) -> Result<&mut Study, GeoError> {
    let only = match study.substudies().len() {
        1 => study.substudies().keys().next().cloned(),
        _ => None,
    };
    match only {
        Some(label) => study
            .substudy_mut(&label)
            .ok_or_else(|| GeoError::MalformedData(format!("substudy {label} vanished"))),
        None => Ok(study),
    }
}

fn open_output(path: Option<&str>) -> miette::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path).into_diagnostic()?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}
