use anyhow::Context;
use clap::{ArgAction, Parser};
use console::style;
use std::path::{Path, PathBuf};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use unnest::{ArchiveFormat, Config, Pipeline, RunReport};

/// Expand a nested archive and sort the payload files into master directories
#[derive(Debug, Parser)]
#[command(version, about)]
struct Opt {
    /// The root archive (zip, tar, tar.gz or tgz)
    input: PathBuf,

    /// Directory to expand into. Defaults to `<input name>_unnested` next to
    /// the input.
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Leave payload files where extraction put them
    #[arg(long)]
    no_organize: bool,

    /// Keep empty directories and metadata markers
    #[arg(long)]
    no_cleanup: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_tracing(&opt);

    let mut config = match &opt.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if opt.no_organize {
        config.organize = false;
    }
    if opt.no_cleanup {
        config.cleanup = false;
    }

    let workdir = opt
        .workdir
        .clone()
        .unwrap_or_else(|| default_workdir(&opt.input));
    let pipeline = Pipeline::new(config)?;
    tracing::info!(input = ?opt.input, ?workdir, "starting");

    let report = run(pipeline, &opt, &workdir)
        .with_context(|| format!("failed to unnest {}", opt.input.display()))?;

    if !opt.quiet {
        print_summary(&report);
    }
    Ok(())
}

#[cfg(feature = "progress")]
fn run(pipeline: Pipeline, opt: &Opt, workdir: &Path) -> unnest::Result<RunReport> {
    let reporter = if opt.quiet {
        unnest::IndicatifProgressReporter::new(indicatif::ProgressBar::hidden())
    } else {
        unnest::IndicatifProgressReporter::with_default_style()
    };
    let result = pipeline
        .with_progress_reporter(&reporter)
        .run(&opt.input, workdir);
    reporter.progress_bar().finish_and_clear();
    result
}

#[cfg(not(feature = "progress"))]
fn run(pipeline: Pipeline, opt: &Opt, workdir: &Path) -> unnest::Result<RunReport> {
    pipeline.run(&opt.input, workdir)
}

fn init_tracing(opt: &Opt) {
    let level = if opt.quiet {
        LevelFilter::ERROR
    } else {
        match opt.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `dir/lot42.tar.gz` becomes `dir/lot42_unnested`
fn default_workdir(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    let stem = ArchiveFormat::detect_from_filename(&name)
        .and_then(|format| {
            let lower = name.to_lowercase();
            format
                .extensions()
                .iter()
                .find(|ext| lower.ends_with(*ext))
                .map(|ext| name[..name.len() - ext.len()].to_string())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or(name);

    input.with_file_name(format!("{stem}_unnested"))
}

fn print_summary(report: &RunReport) {
    let extraction = &report.extraction;
    eprintln!(
        "{} Expanded {} nested archive(s) into {}",
        style("✔").green(),
        extraction.extracted.len(),
        style(report.working_dir.display()).bold()
    );

    if let Some(organize) = &report.organize {
        for (kind, moved) in &organize.moved {
            eprintln!("  {} {}: {} file(s)", style("→").dim(), kind, moved.len());
        }
        if !organize.collisions.is_empty() {
            eprintln!(
                "{} {} file name collision(s), the last file written was kept",
                style("!").yellow(),
                organize.collisions.len()
            );
        }
        for (path, reason) in &organize.failures {
            eprintln!("{} {}: {}", style("✘").red(), path.display(), reason);
        }
    }

    if let Some(cleanup) = &report.cleanup {
        eprintln!(
            "  {} removed {} empty director(ies) and {} metadata marker(s)",
            style("→").dim(),
            cleanup.removed_directories.len(),
            cleanup.removed_markers.len()
        );
    }

    if !extraction.revoked.is_empty() {
        eprintln!(
            "  {} {} file(s) looked like archives but were kept as data",
            style("→").dim(),
            extraction.revoked.len()
        );
    }

    for failure in &extraction.failures {
        eprintln!(
            "{} {}: {}",
            style("✘").red(),
            failure.path.display(),
            failure.reason
        );
    }
}
