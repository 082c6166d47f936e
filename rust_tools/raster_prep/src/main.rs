use clap::Parser;
use env_logger::Env;
use log::info;
use raster_prep::bands::BandKeyTable;
use raster_prep::catalog::{read_region_records, TierTable};
use raster_prep::cli::{Args, Command};
use raster_prep::error::{PrepError, Result};
use raster_prep::ident::{IdSource, RandomIds, SequentialIds};
use raster_prep::pipeline::{self, BandOptions, RunManifest};
use raster_prep::tools::GdalTools;
use std::time::Duration;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Raster Preparation ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| PrepError::Io(std::io::Error::other(e)))?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let ids: Box<dyn IdSource> = if args.deterministic_ids {
        Box::new(SequentialIds::new(args.id_width))
    } else {
        Box::new(RandomIds::new(args.id_width))
    };
    let tools = GdalTools::with_timeout(Duration::from_secs(args.tool_timeout));

    let manifest = match args.command {
        Command::Run(run) => {
            let config = run.into_config(args.manifest.clone());
            pipeline::run(&config, ids.as_ref(), &tools)?;
            info!("Raster preprocessing is now complete!");
            return Ok(());
        }
        Command::Hierarchy(h) => {
            let tiers = TierTable::from_path(&h.regions)?;
            pipeline::build_hierarchy(&tiers, ids.as_ref(), &h.output)?;
            None
        }
        Command::Stage(stage) => {
            let tiers = TierTable::from_path(&stage.tables.regions)?;
            let records = read_region_records(&stage.tables.coordinates)?;
            let mut manifest = RunManifest::default();
            pipeline::stage_rasters(
                &stage.data_folder,
                &stage.staging.extension,
                &records,
                &tiers,
                &stage.staging_folder,
                ids.as_ref(),
                stage.staging.sidecar.into(),
                &mut manifest,
            )?;
            Some(manifest)
        }
        Command::Mosaic(m) => {
            let mut manifest = RunManifest::default();
            pipeline::assemble_mosaics(
                &m.staging_folder,
                &m.output_folder,
                &m.extension,
                &m.mosaic.only_groups,
                m.mosaic.nodata,
                &tools,
                None,
                &mut manifest,
            )?;
            Some(manifest)
        }
        Command::Bands(b) => {
            let table = BandKeyTable::from_path(&b.bands.band_names)?;
            let output = b.output_folder.unwrap_or_else(|| b.input_folder.clone());
            let mut manifest = RunManifest::default();
            pipeline::split_folder(
                &b.input_folder,
                &b.extension,
                &output,
                &tools,
                BandOptions {
                    table: &table,
                    policy: b.bands.unknown_bands.into(),
                    remove_source: !b.bands.keep_sources,
                },
                &mut manifest,
            )?;
            Some(manifest)
        }
    };

    if let Some(manifest) = manifest {
        if let Some(path) = &args.manifest {
            manifest.write_json(path)?;
        }
        manifest.log_summary();
    }

    info!("=== Done! ===");
    Ok(())
}
