use crate::bands::UnknownBandPolicy;
use crate::pipeline::PipelineConfig;
use crate::rekey::SidecarPolicy;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "raster-prep")]
#[command(about = "Classify GeoTIFFs by region, build regional mosaics and split them into bands")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N", global = true)]
    pub threads: Option<usize>,

    /// Tool timeout in seconds for gdalbuildvrt / gdal_translate
    #[arg(long, value_name = "SECONDS", default_value_t = 600, global = true)]
    pub tool_timeout: u64,

    /// Hex digits in generated identifiers
    #[arg(long, value_name = "N", default_value_t = 4, global = true)]
    pub id_width: usize,

    /// Use a counter instead of random identifiers (reproducible names)
    #[arg(long, global = true)]
    pub deterministic_ids: bool,

    /// Write a JSON manifest of succeeded and failed items
    #[arg(long, value_name = "FILE", global = true)]
    pub manifest: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Full run: hierarchy, classification, mosaics, band files
    Run(RunArgs),
    /// Write the region hierarchy JSON only
    Hierarchy(HierarchyArgs),
    /// Classify rasters and copy them into a staging folder
    Stage(StageArgs),
    /// Build one mosaic per region token from a staging folder
    Mosaic(MosaicArgs),
    /// Split every raster in a folder into single-band files
    Bands(BandsArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RegionTables {
    /// Tier table CSV (header row, then tier1..tierN per row)
    #[arg(long, value_name = "FILE", default_value = "all_regions.csv")]
    pub regions: PathBuf,

    /// Region coordinates CSV (header row, then name, latitude, longitude)
    #[arg(long, value_name = "FILE", default_value = "L4_regions_sparse.csv")]
    pub coordinates: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct BandSettings {
    /// Band names JSON
    #[arg(long, value_name = "FILE", default_value = "bandNames.json")]
    pub band_names: PathBuf,

    /// Handling of bands with no entry in the band names file
    #[arg(long, value_enum, default_value_t = UnknownBands::FailFast)]
    pub unknown_bands: UnknownBands,

    /// Keep the multi-band source after splitting
    #[arg(long)]
    pub keep_sources: bool,
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Folder of input GeoTIFFs
    #[arg(short, long, value_name = "DIR")]
    pub data_folder: PathBuf,

    /// Folder for mosaics and band files
    #[arg(short, long, value_name = "DIR")]
    pub output_folder: PathBuf,

    /// Keep staged copies here instead of a temporary folder
    #[arg(long, value_name = "DIR")]
    pub staging_folder: Option<PathBuf>,

    /// Region hierarchy JSON output
    #[arg(long, value_name = "FILE", default_value = "all_regions.json")]
    pub hierarchy_json: PathBuf,

    #[command(flatten)]
    pub tables: RegionTables,

    #[command(flatten)]
    pub bands: BandSettings,

    #[command(flatten)]
    pub staging: StagingSettings,

    #[command(flatten)]
    pub mosaic: MosaicSettings,
}

#[derive(ClapArgs, Debug)]
pub struct HierarchyArgs {
    /// Tier table CSV
    #[arg(long, value_name = "FILE", default_value = "all_regions.csv")]
    pub regions: PathBuf,

    /// Region hierarchy JSON output
    #[arg(short, long, value_name = "FILE", default_value = "all_regions.json")]
    pub output: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct StagingSettings {
    /// Raster file extension
    #[arg(long, default_value = "tif")]
    pub extension: String,

    /// Handling of rasters without a .hdr sidecar
    #[arg(long, value_enum, default_value_t = Sidecar::Optional)]
    pub sidecar: Sidecar,
}

#[derive(ClapArgs, Debug)]
pub struct StageArgs {
    /// Folder of input GeoTIFFs
    #[arg(short, long, value_name = "DIR")]
    pub data_folder: PathBuf,

    /// Folder receiving the renamed copies
    #[arg(short, long, value_name = "DIR")]
    pub staging_folder: PathBuf,

    #[command(flatten)]
    pub tables: RegionTables,

    #[command(flatten)]
    pub staging: StagingSettings,
}

#[derive(ClapArgs, Debug)]
pub struct MosaicSettings {
    /// Treat this pixel value as nodata to hide tile borders (commonly 0)
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true)]
    pub nodata: Option<f64>,

    /// Only build these groups (repeatable)
    #[arg(long = "only", value_name = "TOKEN")]
    pub only_groups: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct MosaicArgs {
    /// Folder of staged rasters
    #[arg(short, long, value_name = "DIR")]
    pub staging_folder: PathBuf,

    /// Folder for mosaics
    #[arg(short, long, value_name = "DIR")]
    pub output_folder: PathBuf,

    /// Raster file extension
    #[arg(long, default_value = "tif")]
    pub extension: String,

    #[command(flatten)]
    pub mosaic: MosaicSettings,
}

#[derive(ClapArgs, Debug)]
pub struct BandsArgs {
    /// Folder of multi-band rasters
    #[arg(short, long, value_name = "DIR")]
    pub input_folder: PathBuf,

    /// Folder for band files (default: the input folder)
    #[arg(short, long, value_name = "DIR")]
    pub output_folder: Option<PathBuf>,

    /// Raster file extension
    #[arg(long, default_value = "tif")]
    pub extension: String,

    #[command(flatten)]
    pub bands: BandSettings,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidecar {
    Optional,
    Required,
}

impl From<Sidecar> for SidecarPolicy {
    fn from(value: Sidecar) -> Self {
        match value {
            Sidecar::Optional => SidecarPolicy::Optional,
            Sidecar::Required => SidecarPolicy::Required,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownBands {
    FailFast,
    Skip,
}

impl From<UnknownBands> for UnknownBandPolicy {
    fn from(value: UnknownBands) -> Self {
        match value {
            UnknownBands::FailFast => UnknownBandPolicy::FailFast,
            UnknownBands::Skip => UnknownBandPolicy::Skip,
        }
    }
}

impl RunArgs {
    pub fn into_config(self, manifest: Option<PathBuf>) -> PipelineConfig {
        PipelineConfig {
            region_table: self.tables.regions,
            coordinate_table: self.tables.coordinates,
            hierarchy_json: self.hierarchy_json,
            band_names: self.bands.band_names,
            data_folder: self.data_folder,
            staging_dir: self.staging_folder,
            output_folder: self.output_folder,
            extension: self.staging.extension,
            nodata: self.mosaic.nodata,
            sidecar: self.staging.sidecar.into(),
            unknown_band: self.bands.unknown_bands.into(),
            keep_mosaics: self.bands.keep_sources,
            only_groups: self.mosaic.only_groups,
            manifest,
        }
    }
}
