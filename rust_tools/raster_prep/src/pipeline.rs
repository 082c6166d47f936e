//! Stage orchestration: hierarchy, classify + rekey, then mosaic + band split.
//!
//! Per-asset and per-group failures are collected in a [`RunManifest`]; only
//! configuration failures (tables, band names, hierarchy) abort the run.

use crate::bands::{split_raster, BandKeyTable, UnknownBandPolicy};
use crate::catalog::{read_region_records, RegionRecord, TierTable};
use crate::error::{PrepError, Result};
use crate::geodesy::GeoPoint;
use crate::hierarchy::RegionTree;
use crate::ident::IdSource;
use crate::mosaic::{assemble_group, plan_mosaics, select_groups, MosaicGroup};
use crate::raster::{list_rasters, RasterAsset};
use crate::rekey::{stage_asset, SidecarPolicy, StagedRaster};
use crate::resolve::{geographic_center, nearest_region, NearestRegion};
use crate::tools::RasterTools;
use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub region_table: PathBuf,
    pub coordinate_table: PathBuf,
    pub hierarchy_json: PathBuf,
    pub band_names: PathBuf,
    pub data_folder: PathBuf,
    /// Temporary directory (removed after the run) when unset
    pub staging_dir: Option<PathBuf>,
    pub output_folder: PathBuf,
    pub extension: String,
    pub nodata: Option<f64>,
    pub sidecar: SidecarPolicy,
    pub unknown_band: UnknownBandPolicy,
    pub keep_mosaics: bool,
    pub only_groups: Vec<String>,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedItem {
    pub source: PathBuf,
    pub staged: PathBuf,
    pub header: Option<PathBuf>,
    pub region_path: Vec<String>,
    pub center: Option<GeoPoint>,
    /// Row of the nearest region in the coordinate table
    pub region_index: usize,
    pub distance_km: f64,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MosaicItem {
    pub token: String,
    pub output: PathBuf,
    pub members: usize,
    pub bands: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub stage: &'static str,
    pub item: String,
    pub error: String,
}

impl FailedItem {
    fn new(stage: &'static str, item: impl Into<String>, err: &PrepError) -> Self {
        Self {
            stage,
            item: item.into(),
            error: err.to_string(),
        }
    }
}

/// Succeeded and failed items of every stage that ran.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunManifest {
    pub staged: Vec<StagedItem>,
    pub mosaics: Vec<MosaicItem>,
    pub failed: Vec<FailedItem>,
}

impl RunManifest {
    pub fn failures(&self, stage: &str) -> impl Iterator<Item = &FailedItem> + '_ {
        let stage = stage.to_string();
        self.failed.iter().filter(move |f| f.stage == stage)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        info!("Writing run manifest: {}", path.display());
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn log_summary(&self) {
        info!("=== Summary ===");
        info!("\tstaged rasters: {}", self.staged.len());
        info!("\tmosaics: {}", self.mosaics.len());
        info!(
            "\tband files: {}",
            self.mosaics.iter().map(|m| m.bands.len()).sum::<usize>()
        );
        for failure in &self.failed {
            error!("\t[{}] {}: {}", failure.stage, failure.item, failure.error);
        }
        if self.failed.is_empty() {
            info!("\tno failures");
        } else {
            warn!("\t{} items failed", self.failed.len());
        }
    }
}

/// Band splitting settings applied to every materialized mosaic.
#[derive(Debug, Clone, Copy)]
pub struct BandOptions<'a> {
    pub table: &'a BandKeyTable,
    pub policy: UnknownBandPolicy,
    pub remove_source: bool,
}

/// Build the region tree from the tier table and write its JSON form.
pub fn build_hierarchy(table: &TierTable, ids: &dyn IdSource, output: &Path) -> Result<RegionTree> {
    info!("####### REGION HIERARCHY #######");
    info!("{} tiers, {} rows", table.depth(), table.rows().len());
    let tree = RegionTree::build(table, ids)?;
    tree.write_json(output)?;
    Ok(tree)
}

/// Resolve one raster's nearest region and copy it into staging.
pub fn classify_and_stage(
    path: &Path,
    records: &[RegionRecord],
    tiers: &TierTable,
    staging_dir: &Path,
    ids: &dyn IdSource,
    sidecar: SidecarPolicy,
) -> Result<(RasterAsset, StagedRaster, NearestRegion)> {
    let mut asset = RasterAsset::open(path)?;
    let center = geographic_center(&asset)?;
    asset.center = Some(center);

    let nearest = nearest_region(center, records)?;
    info!(
        "\t{}: nearest region {} ({:.2} km)",
        asset.file_name(),
        nearest.name,
        nearest.distance_km
    );

    let chain = tiers.chain_for(&nearest.name)?.to_vec();
    let staged = stage_asset(&asset, &chain, staging_dir, ids, sidecar)?;

    asset.region_path = chain;
    asset.unique_id = Some(staged.unique_id.clone());
    Ok((asset, staged, nearest))
}

/// Classify and stage every raster in `data_folder`, one worker per asset.
pub fn stage_rasters(
    data_folder: &Path,
    extension: &str,
    records: &[RegionRecord],
    tiers: &TierTable,
    staging_dir: &Path,
    ids: &dyn IdSource,
    sidecar: SidecarPolicy,
    manifest: &mut RunManifest,
) -> Result<()> {
    info!("####### REGIONAL IDENTIFICATION ROUTINE #######");
    if records.is_empty() {
        return Err(PrepError::NoRegionsConfigured);
    }
    fs::create_dir_all(staging_dir)?;
    let paths = list_rasters(data_folder, extension)?;

    let outcomes: Vec<(PathBuf, Result<(RasterAsset, StagedRaster, NearestRegion)>)> = paths
        .par_iter()
        .map(|path| {
            let outcome = classify_and_stage(path, records, tiers, staging_dir, ids, sidecar);
            (path.clone(), outcome)
        })
        .collect();

    for (path, outcome) in outcomes {
        match outcome {
            Ok((asset, staged, nearest)) => manifest.staged.push(StagedItem {
                source: path,
                staged: staged.raster,
                header: staged.header,
                region_path: asset.region_path,
                center: asset.center,
                region_index: nearest.index,
                distance_km: nearest.distance_km,
                unique_id: staged.unique_id,
            }),
            Err(e) => {
                warn!("\t{}: {}", path.display(), e);
                manifest
                    .failed
                    .push(FailedItem::new("classify", path.display().to_string(), &e));
            }
        }
    }

    info!(
        "Staged {} of {} rasters",
        manifest.staged.len(),
        manifest.staged.len() + manifest.failures("classify").count()
    );
    Ok(())
}

fn assemble_and_split(
    group: &MosaicGroup,
    tools: &dyn RasterTools,
    nodata: Option<f64>,
    bands: Option<BandOptions<'_>>,
    output_folder: &Path,
) -> std::result::Result<MosaicItem, FailedItem> {
    let output = assemble_group(group, tools, nodata)
        .map_err(|e| FailedItem::new("mosaic", group.token.clone(), &e))?;

    let mut item = MosaicItem {
        token: group.token.clone(),
        output,
        members: group.members.len(),
        bands: Vec::new(),
    };

    if let Some(opts) = bands {
        let split = split_raster(
            &item.output,
            opts.table,
            output_folder,
            tools,
            opts.policy,
            opts.remove_source,
        )
        .map_err(|e| FailedItem::new("bands", group.token.clone(), &e))?;
        item.bands = split.outputs.into_iter().map(|(_, p)| p).collect();
    }

    Ok(item)
}

/// Build one mosaic per hierarchy token found in `staging_dir`, each group on
/// its own worker, splitting each finished mosaic into bands when requested.
pub fn assemble_mosaics(
    staging_dir: &Path,
    output_folder: &Path,
    extension: &str,
    only_groups: &[String],
    nodata: Option<f64>,
    tools: &dyn RasterTools,
    bands: Option<BandOptions<'_>>,
    manifest: &mut RunManifest,
) -> Result<()> {
    info!("####### REGIONAL MOSAIC GENERATION ROUTINE #######");
    fs::create_dir_all(output_folder)?;
    let groups = select_groups(plan_mosaics(staging_dir, output_folder, extension)?, only_groups);

    let outcomes: Vec<std::result::Result<MosaicItem, FailedItem>> = groups
        .par_iter()
        .map(|group| assemble_and_split(group, tools, nodata, bands, output_folder))
        .collect();

    for outcome in outcomes {
        match outcome {
            Ok(item) => manifest.mosaics.push(item),
            Err(failure) => {
                warn!("\tgroup {}: {}", failure.item, failure.error);
                manifest.failed.push(failure);
            }
        }
    }
    Ok(())
}

/// Split every raster in `folder` into band files next to it.
pub fn split_folder(
    folder: &Path,
    extension: &str,
    output_folder: &Path,
    tools: &dyn RasterTools,
    bands: BandOptions<'_>,
    manifest: &mut RunManifest,
) -> Result<()> {
    info!("####### BAND EXTRACTION ROUTINE #######");
    fs::create_dir_all(output_folder)?;
    let sources = list_rasters(folder, extension)?;

    let outcomes: Vec<(PathBuf, Result<Vec<PathBuf>>)> = sources
        .par_iter()
        .map(|source| {
            let outcome = split_raster(
                source,
                bands.table,
                output_folder,
                tools,
                bands.policy,
                bands.remove_source,
            )
            .map(|split| split.outputs.into_iter().map(|(_, p)| p).collect());
            (source.clone(), outcome)
        })
        .collect();

    for (source, outcome) in outcomes {
        match outcome {
            Ok(outputs) => manifest.mosaics.push(MosaicItem {
                token: source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                output: source,
                members: 1,
                bands: outputs,
            }),
            Err(e) => {
                warn!("\t{}: {}", source.display(), e);
                manifest
                    .failed
                    .push(FailedItem::new("bands", source.display().to_string(), &e));
            }
        }
    }
    Ok(())
}

/// Full run: hierarchy, staging, then mosaics split into bands.
pub fn run(config: &PipelineConfig, ids: &dyn IdSource, tools: &dyn RasterTools) -> Result<RunManifest> {
    // Configuration is read up front so a bad table aborts before any raster work
    let tiers = TierTable::from_path(&config.region_table)?;
    let records = read_region_records(&config.coordinate_table)?;
    if records.is_empty() {
        return Err(PrepError::NoRegionsConfigured);
    }
    let band_table = BandKeyTable::from_path(&config.band_names)?;

    build_hierarchy(&tiers, ids, &config.hierarchy_json)?;

    let temp_staging;
    let staging_dir = match &config.staging_dir {
        Some(dir) => dir.clone(),
        None => {
            temp_staging = tempfile::tempdir()?;
            temp_staging.path().to_path_buf()
        }
    };

    let mut manifest = RunManifest::default();
    stage_rasters(
        &config.data_folder,
        &config.extension,
        &records,
        &tiers,
        &staging_dir,
        ids,
        config.sidecar,
        &mut manifest,
    )?;

    let bands = BandOptions {
        table: &band_table,
        policy: config.unknown_band,
        remove_source: !config.keep_mosaics,
    };
    assemble_mosaics(
        &staging_dir,
        &config.output_folder,
        &config.extension,
        &config.only_groups,
        config.nodata,
        tools,
        Some(bands),
        &mut manifest,
    )?;

    if let Some(path) = &config.manifest {
        manifest.write_json(path)?;
    }
    manifest.log_summary();
    Ok(manifest)
}
