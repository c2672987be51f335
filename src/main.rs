mod client;
mod config;
mod error;
mod filters;
mod output;
mod photometry;
mod query;
mod report;
mod search;
mod types;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::client::{KowalskiClient, TriageClient};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::output::run_csv_path;
use crate::report::ReportOptions;
use crate::search::{run_search, SearchParams};
use crate::types::{jd_from_iso, FilterMode, Instrument, SearchProfile};

#[derive(Parser, Debug)]
#[command(name = "galscan")]
#[command(about = "Galactic-plane transient candidate scanner")]
#[command(version)]
struct Args {
    /// Output directory for run artifacts
    outdir: PathBuf,

    /// Search for candidates detected after this time,
    /// e.g. 2023-04-23T00:00:00
    start_date: String,

    /// Search for candidates detected before this time
    end_date: String,

    /// Survey instrument whose alert stream to search
    #[arg(long, value_enum, default_value_t = Instrument::Ztf)]
    instrument: Instrument,

    /// Post-run triage behavior
    #[arg(long, value_enum, default_value_t = FilterMode::Fritz)]
    filter: FilterMode,

    /// Query thresholds and cascade variant
    #[arg(long, value_enum, default_value_t = SearchProfile::GalacticPlane)]
    profile: SearchProfile,

    /// Worker-thread count forwarded to the query service
    #[arg(long, default_value_t = 8)]
    nthreads: u32,

    /// Triage group ids, comma-separated, e.g. "48,49"
    #[arg(long, default_value = "48")]
    groupids: String,

    /// Write one photometry CSV per candidate instead of a combined file
    #[arg(long)]
    plot_lightcurves_separately: bool,

    /// Download each candidate's raw cutout triplet
    #[arg(long)]
    plot_thumbnails_separately: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg, args).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, args: Args) -> Result<()> {
    let start_jd = jd_from_iso(&args.start_date)?;
    let end_jd = jd_from_iso(&args.end_date)?;
    if end_jd <= start_jd {
        return Err(AppError::Config(format!(
            "end_date {} is not after start_date {}",
            args.end_date, args.start_date
        )));
    }
    let group_ids = parse_group_ids(&args.groupids)?;

    let (phot_dir, thumbnails_dir) = setup_output_directories(&args.outdir)?;
    let savefile = run_csv_path(&args.outdir, args.profile, args.instrument, start_jd, end_jd);

    let kowalski = KowalskiClient::new(&cfg)?;
    info!(
        instrument = %args.instrument,
        profile = %args.profile,
        "searching JD {start_jd:.2} to {end_jd:.2}"
    );

    let params = SearchParams {
        instrument: args.instrument,
        profile: args.profile,
        start_jd,
        end_jd,
        nthreads: args.nthreads,
        savefile: savefile.clone(),
    };
    let (set, summary) = run_search(&kowalski, &params).await?;
    info!(
        accepted = summary.accepted,
        windows = summary.windows_queried,
        "search complete"
    );
    if let Some(from) = summary.abandoned_from {
        error!("coverage is partial: span from JD {from:.4} was abandoned");
    }

    // --- Report stage ---
    let opts = ReportOptions {
        phot_dir,
        thumbnails_dir,
        lightcurves_separately: args.plot_lightcurves_separately,
        fetch_thumbnails: args.plot_thumbnails_separately,
    };
    let deduped = report::deduplicate(set.into_vec());
    info!(candidates = deduped.len(), "deduplicated for reporting");

    let annotated = report::crossmatch_candidates(&kowalski, deduped).await;
    report::write_photometry_files(&annotated, &opts)?;
    if opts.fetch_thumbnails {
        report::fetch_thumbnails(&kowalski, args.instrument, &annotated, &opts).await;
    }
    report::write_summary(&savefile.with_extension("md"), &annotated, &summary)?;

    if args.filter == FilterMode::Fritz && !annotated.is_empty() {
        let triage = TriageClient::new(&cfg)?;
        report::post_to_triage(&triage, &annotated, &group_ids).await;
    }

    info!("found {} candidates in total", annotated.len());
    Ok(())
}

/// Create `photometry/` and `thumbnails/` under the output directory.
fn setup_output_directories(outdir: &Path) -> Result<(PathBuf, PathBuf)> {
    let phot_dir = outdir.join("photometry");
    let thumbnails_dir = outdir.join("thumbnails");
    for dir in [&phot_dir, &thumbnails_dir] {
        std::fs::create_dir_all(dir)?;
    }
    Ok((phot_dir, thumbnails_dir))
}

fn parse_group_ids(s: &str) -> Result<Vec<i64>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| AppError::Config(format!("invalid group id '{part}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ids_parse_and_trim() {
        assert_eq!(parse_group_ids("48").unwrap(), vec![48]);
        assert_eq!(parse_group_ids("48, 49").unwrap(), vec![48, 49]);
        assert!(parse_group_ids("48,abc").is_err());
    }

    #[test]
    fn output_directories_are_created() {
        let outdir = std::env::temp_dir()
            .join(format!("galscan_outdir_{}", std::process::id()));
        let (phot, thumbs) = setup_output_directories(&outdir).unwrap();
        assert!(phot.is_dir());
        assert!(thumbs.is_dir());
        std::fs::remove_dir_all(&outdir).unwrap();
    }
}
