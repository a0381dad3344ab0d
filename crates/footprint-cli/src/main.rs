//! Command-line interface for `footprint`, polygon queries over remote building footprints.
//!
//! This binary is a thin façade over the [`footprint_core`] library: it parses
//! arguments, configures logging, resolves the engine options and hands the
//! work to the query service.
//!
//! # Available Commands
//!
//! - `build-index` - Rebuild the per-file bounding-box index from Parquet footers
//! - `query` - Return the buildings intersecting a polygon as `GeoJSON`
//! - `stats` - Summarize attribute coverage and provenance for a polygon
//! - `export` - Write the buildings intersecting a polygon to a compact `GeoJSON` file
//! - `health` - Report the configured release and query readiness

mod display;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{Level, debug, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use footprint_core::{
    BuildingQuery, BuildingQueryService, BuildingsResponse, EngineOptions, ExportPayload,
    FootprintError, HealthResponse, StatsResponse, shared_warm_up,
};

#[derive(Parser)]
#[command(
    name = "footprint",
    version,
    about = "Polygon queries over remote GeoParquet building footprints",
    long_about = "footprint answers which buildings intersect a polygon, using a per-file\n\
                  bounding-box index to read only the Parquet files that can match."
)]
/// Command-line arguments and options for the `footprint` CLI.
///
/// Dataset, index and region flags override the `FOOTPRINT_*` environment
/// variables, which in turn override the built-in defaults.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Dataset location: a local directory or an `s3://` / `gs://` prefix.
    #[arg(long, global = true, value_name = "LOCATION")]
    dataset: Option<String>,

    /// Path of the file index.
    #[arg(long, global = true, value_name = "PATH")]
    index: Option<PathBuf>,

    /// Region used for `s3://` datasets.
    #[arg(long, global = true, value_name = "REGION")]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// The polygon a query runs against.
#[derive(Args, Debug)]
struct GeometryArgs {
    /// File holding a `GeoJSON` Polygon or MultiPolygon geometry, or `-` for stdin.
    #[arg(short, long, value_name = "FILE")]
    geometry: String,

    /// Maximum number of buildings to return.
    #[arg(short, long)]
    limit: Option<usize>,
}

/// Available subcommands for the `footprint` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Rebuilds the file index from the dataset's Parquet footers.
    ///
    /// The previous index is replaced only when the whole build succeeds.
    BuildIndex,

    /// Prints the buildings intersecting a polygon as a `FeatureCollection`
    /// with result metadata.
    Query {
        #[command(flatten)]
        geometry: GeometryArgs,

        /// Print the JSON on a single line.
        #[arg(long)]
        compact: bool,
    },

    /// Prints attribute coverage and source provenance for a polygon.
    Stats {
        #[command(flatten)]
        geometry: GeometryArgs,

        /// Print JSON instead of tables.
        #[arg(long)]
        json: bool,
    },

    /// Writes the buildings intersecting a polygon to a compact `GeoJSON` file.
    Export {
        #[command(flatten)]
        geometry: GeometryArgs,

        /// Output file. Defaults to `overture_buildings.geojson` in the current directory.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Reports the configured release and whether queries will be fast.
    Health {
        /// Warm the engine session against the full dataset before reporting.
        #[arg(long)]
        warm_up: bool,
    },
}

/// Entry point for the `footprint` command-line interface.
///
/// # Errors
///
/// Returns an error if the logging system cannot be initialized, the
/// configuration is invalid, or the command fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity flags
    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let options = resolve_options(&cli).map_err(describe)?;
    debug!("Dataset: {}", options.dataset);
    debug!("Index: {}", options.index_path.display());

    match cli.command {
        Commands::BuildIndex => handle_build_index(options).await?,
        Commands::Query { geometry, compact } => {
            info!("Querying buildings");
            handle_query(options, &geometry, compact).await?;
        },
        Commands::Stats { geometry, json } => handle_stats(options, &geometry, json).await?,
        Commands::Export { geometry, output } => {
            handle_export(options, &geometry, output.as_deref()).await?;
        },
        Commands::Health { warm_up } => handle_health(options, warm_up).await?,
    }

    Ok(())
}

fn resolve_options(cli: &Cli) -> footprint_core::Result<EngineOptions> {
    let mut options = EngineOptions::from_env()?;
    if let Some(dataset) = &cli.dataset {
        options = options.with_dataset(dataset.clone());
    }
    if let Some(index) = &cli.index {
        options = options.with_index_path(index.clone());
    }
    if let Some(region) = &cli.region {
        options = options.with_region(region.clone());
    }
    Ok(options)
}

/// Turns a library error into the message shown to the user, with a hint
/// when one is available.
fn describe(err: FootprintError) -> anyhow::Error {
    if !err.is_client_error() {
        warn!("{err}");
    }
    match err.recovery_suggestion() {
        Some(hint) => anyhow!("{}\n\nHint: {hint}", err.user_message()),
        None => anyhow!("{}", err.user_message()),
    }
}

async fn service(options: EngineOptions) -> Result<BuildingQueryService> {
    BuildingQueryService::shared(options).await.map_err(describe)
}

fn read_geometry(source: &str) -> Result<Value> {
    let text = if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read geometry from stdin")?;
        text
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read geometry file '{source}'"))?
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid geometry: '{source}' is not JSON"))
}

fn building_query(args: &GeometryArgs, default_limit: usize) -> Result<BuildingQuery> {
    let geometry = read_geometry(&args.geometry)?;
    Ok(BuildingQuery::new(geometry).with_limit(args.limit.unwrap_or(default_limit)))
}

async fn handle_build_index(options: EngineOptions) -> Result<()> {
    info!("Building index for {}", options.dataset);
    let service = service(options).await?;
    let report = service.build_index().await.map_err(describe)?;
    info!("Index build complete.");
    display::display_index_report(&report);
    Ok(())
}

async fn handle_query(options: EngineOptions, args: &GeometryArgs, compact: bool) -> Result<()> {
    let request = building_query(args, options.default_limit)?;
    let release = options.release.clone();
    let service = service(options).await?;
    let result = service.query(&request).await.map_err(describe)?;

    let response = BuildingsResponse::new(result, release);
    let body = if compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{body}");
    Ok(())
}

async fn handle_stats(options: EngineOptions, args: &GeometryArgs, json: bool) -> Result<()> {
    let request = building_query(args, options.default_limit)?;
    let service = service(options).await?;
    let result = service.query(&request).await.map_err(describe)?;

    let stats = StatsResponse::from(&result);
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        display::display_stats(&stats, result.truncated());
    }
    Ok(())
}

async fn handle_export(
    options: EngineOptions,
    args: &GeometryArgs,
    output: Option<&Path>,
) -> Result<()> {
    let request = building_query(args, options.default_limit)?;
    let service = service(options).await?;
    let result = service.query(&request).await.map_err(describe)?;
    let total = result.total();

    let payload = ExportPayload::new(result)?;
    let path = output.map_or_else(|| PathBuf::from(payload.filename), Path::to_path_buf);
    fs::write(&path, &payload.body)
        .with_context(|| format!("Failed to write export to '{}'", path.display()))?;
    info!("Wrote {total} buildings to {} ({})", path.display(), payload.content_type);
    println!("{}", path.display());
    Ok(())
}

async fn handle_health(options: EngineOptions, warm_up: bool) -> Result<()> {
    let release = options.release.clone();
    let service = service(options).await?;
    let state = shared_warm_up();

    if warm_up {
        if let Some(handle) = service.start_warm_up(state) {
            let outcome = handle.await?;
            info!("Warm-up finished: {outcome}");
        }
    }

    let health = HealthResponse::new(release, service.readiness(state));
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
