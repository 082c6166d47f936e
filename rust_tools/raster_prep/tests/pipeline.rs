use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use raster_prep::bands::{BandKeyTable, UnknownBandPolicy};
use raster_prep::catalog::{region_records_from_reader, TierTable};
use raster_prep::error::{PrepError, Result};
use raster_prep::ident::SequentialIds;
use raster_prep::pipeline::{self, PipelineConfig, RunManifest};
use raster_prep::rekey::SidecarPolicy;
use raster_prep::tools::RasterTools;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TIERS: &str = "Tier1,Tier2\nRoss Island,McMurdoStation\nRoss Island,ScottBase\n";
const CENTERS: &str = "Region,Lat,Lon\nMcMurdoStation,-77.85,166.67\nScottBase,-77.85,166.75\n";
const SIZE: usize = 4;
const PIXEL: f64 = 0.01;

/// Write a small WGS84 GeoTIFF whose center pixel sits on (lat, lon).
fn write_geotiff(path: &Path, lat: f64, lon: f64, bands: usize, with_crs: bool) {
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut dataset = driver
        .create_with_band_type::<u8, _>(path, SIZE, SIZE, bands)
        .unwrap();

    let half = (SIZE / 2) as f64 + 0.5;
    dataset
        .set_geo_transform(&[lon - half * PIXEL, PIXEL, 0.0, lat + half * PIXEL, 0.0, -PIXEL])
        .unwrap();
    if with_crs {
        let wkt = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        dataset.set_projection(&wkt).unwrap();
    }

    for b in 1..=bands {
        let mut band = dataset.rasterband(b).unwrap();
        let pixels: Vec<u8> = (0..SIZE * SIZE).map(|i| (i + b * 10) as u8).collect();
        let mut buffer = Buffer::new((SIZE, SIZE), pixels);
        band.write((0, 0), (SIZE, SIZE), &mut buffer).unwrap();
    }
}

fn read_band(path: &Path, band: usize) -> Vec<u8> {
    let dataset = Dataset::open(path).unwrap();
    let band = dataset.rasterband(band).unwrap();
    let buffer = band
        .read_as::<u8>((0, 0), (SIZE, SIZE), (SIZE, SIZE), None)
        .unwrap();
    buffer.into_iter().collect()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Stand-in for gdalbuildvrt / gdal_translate: the "virtual mosaic" lists its
/// members and translating it copies the first member.
#[derive(Default)]
struct CopyTools {
    nodata_seen: Mutex<Vec<Option<f64>>>,
}

impl RasterTools for CopyTools {
    fn build_virtual_mosaic(&self, inputs: &[PathBuf], descriptor: &Path, _: Option<f64>) -> Result<()> {
        let listing: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
        fs::write(descriptor, listing.join("\n"))?;
        Ok(())
    }

    fn translate(&self, input: &Path, output: &Path, nodata: Option<f64>) -> Result<()> {
        self.nodata_seen.lock().unwrap().push(nodata);
        let listing = fs::read_to_string(input)?;
        let first = listing.lines().next().unwrap_or_default();
        fs::copy(first, output)?;
        Ok(())
    }

    fn extract_band(&self, input: &Path, band: usize, output: &Path) -> Result<()> {
        fs::write(output, read_band(input, band))?;
        Ok(())
    }
}

struct Workspace {
    _root: tempfile::TempDir,
    config: PipelineConfig,
}

fn workspace() -> Workspace {
    let root = tempfile::tempdir().unwrap();
    let path = root.path();
    fs::write(path.join("regions.csv"), TIERS).unwrap();
    fs::write(path.join("centers.csv"), CENTERS).unwrap();
    fs::write(path.join("bands.json"), r#"[{"name": "red"}, {"name": "green"}]"#).unwrap();
    fs::create_dir(path.join("data")).unwrap();

    let config = PipelineConfig {
        region_table: path.join("regions.csv"),
        coordinate_table: path.join("centers.csv"),
        hierarchy_json: path.join("regions.json"),
        band_names: path.join("bands.json"),
        data_folder: path.join("data"),
        staging_dir: Some(path.join("staging")),
        output_folder: path.join("output"),
        extension: "tif".to_string(),
        nodata: Some(0.0),
        sidecar: SidecarPolicy::Optional,
        unknown_band: UnknownBandPolicy::FailFast,
        keep_mosaics: false,
        only_groups: Vec::new(),
        manifest: Some(path.join("manifest.json")),
    };
    Workspace {
        _root: root,
        config,
    }
}

#[test]
fn test_end_to_end_ross_island() {
    let ws = workspace();
    let data = &ws.config.data_folder;
    // 0.03 degrees of longitude from McMurdo, 0.05 from Scott Base
    write_geotiff(&data.join("scene_a.tif"), -77.85, 166.70, 2, true);
    fs::write(data.join("scene_a.hdr"), "ENVI\nbands = 2\n").unwrap();
    write_geotiff(&data.join("scene_b.tif"), -77.85, 166.76, 2, true);
    write_geotiff(&data.join("scene_c.tif"), -77.85, 166.70, 2, false);

    let tools = CopyTools::default();
    let manifest = pipeline::run(&ws.config, &SequentialIds::new(4), &tools).unwrap();

    // Classification: scene_c has no CRS and fails alone
    assert_eq!(manifest.staged.len(), 2);
    let failures: Vec<_> = manifest.failures("classify").collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].item.ends_with("scene_c.tif"));
    assert!(failures[0].error.contains("Projection error"));

    let a = &manifest.staged[0];
    assert!(a.source.ends_with("scene_a.tif"));
    assert_eq!(a.region_path, ["Ross Island", "McMurdoStation"]);
    assert_eq!(a.region_index, 0);
    let center = a.center.unwrap();
    assert!((center.lat + 77.85).abs() < 1e-6);
    assert!((center.lon - 166.70).abs() < 1e-6);
    let staged_name = a.staged.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(staged_name, format!("RossIsland_McMurdoStation_{}.tif", a.unique_id));
    assert!(a.header.as_ref().unwrap().exists());

    let b = &manifest.staged[1];
    assert_eq!(b.region_path, ["Ross Island", "ScottBase"]);
    assert_eq!(b.region_index, 1);
    assert!(b.header.is_none());

    // Originals are untouched
    assert!(data.join("scene_a.tif").exists());

    // One mosaic per token, each split into its two bands
    let tokens: Vec<&str> = manifest.mosaics.iter().map(|m| m.token.as_str()).collect();
    assert_eq!(tokens, ["RossIsland", "McMurdoStation", "ScottBase"]);
    assert_eq!(manifest.mosaics[0].members, 2);
    assert!(manifest.mosaics.iter().all(|m| m.bands.len() == 2));
    assert!(tools.nodata_seen.lock().unwrap().iter().all(|n| *n == Some(0.0)));

    assert_eq!(
        file_names(&ws.config.output_folder),
        [
            "McMurdoStation_green.tif",
            "McMurdoStation_red.tif",
            "RossIsland_green.tif",
            "RossIsland_red.tif",
            "ScottBase_green.tif",
            "ScottBase_red.tif",
        ]
    );

    assert!(ws.config.hierarchy_json.exists());
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ws.config.manifest.as_ref().unwrap()).unwrap())
            .unwrap();
    assert_eq!(written["staged"].as_array().unwrap().len(), 2);
}

#[test]
fn test_bad_region_table_aborts_before_staging() {
    let ws = workspace();
    fs::write(&ws.config.region_table, "Tier1,Tier2\nRoss Island\n").unwrap();
    write_geotiff(&ws.config.data_folder.join("scene_a.tif"), -77.85, 166.70, 1, true);

    let err = pipeline::run(&ws.config, &SequentialIds::new(4), &CopyTools::default()).unwrap_err();
    assert!(matches!(err, PrepError::MalformedRow { line: 2, .. }));
    assert!(!ws.config.staging_dir.as_ref().unwrap().exists());
}

#[test]
fn test_rekey_preserves_raster_content() {
    let ws = workspace();
    let source = ws.config.data_folder.join("scene.tif");
    write_geotiff(&source, -77.85, 166.74, 3, true);

    let tiers = TierTable::from_reader(TIERS.as_bytes()).unwrap();
    let records = region_records_from_reader(CENTERS.as_bytes()).unwrap();
    let staging = ws.config.staging_dir.clone().unwrap();
    fs::create_dir_all(&staging).unwrap();

    let (asset, staged, _) = pipeline::classify_and_stage(
        &source,
        &records,
        &tiers,
        &staging,
        &SequentialIds::new(4),
        SidecarPolicy::Optional,
    )
    .unwrap();

    assert_eq!(asset.region_path, ["Ross Island", "ScottBase"]);
    assert_eq!(fs::read(&source).unwrap(), fs::read(&staged.raster).unwrap());

    let original = Dataset::open(&source).unwrap();
    let copy = Dataset::open(&staged.raster).unwrap();
    assert_eq!(original.raster_count(), copy.raster_count());
    assert_eq!(original.projection(), copy.projection());
    for band in 1..=3 {
        assert_eq!(read_band(&source, band), read_band(&staged.raster, band));
    }
}

#[test]
fn test_mosaic_count_covers_every_region() {
    let ws = workspace();
    let staging = ws.config.staging_dir.clone().unwrap();
    fs::create_dir_all(&staging).unwrap();
    for name in [
        "RossIsland_McMurdoStation_0001.tif",
        "RossIsland_McMurdoStation_0002.tif",
        "RossIsland_ScottBase_0003.tif",
        "DryValleys_TaylorValley_0004.tif",
    ] {
        write_geotiff(&staging.join(name), -77.85, 166.70, 1, true);
    }

    let mut manifest = RunManifest::default();
    pipeline::assemble_mosaics(
        &staging,
        &ws.config.output_folder,
        "tif",
        &[],
        None,
        &CopyTools::default(),
        None,
        &mut manifest,
    )
    .unwrap();

    // 3 distinct lowest-tier regions, 5 distinct tokens
    assert_eq!(manifest.mosaics.len(), 5);
    assert!(manifest.failed.is_empty());
    let mcmurdo = manifest
        .mosaics
        .iter()
        .find(|m| m.token == "McMurdoStation")
        .unwrap();
    assert_eq!(mcmurdo.members, 2);
    assert!(ws.config.output_folder.join("DryValleys.tif").exists());
    assert!(!ws.config.output_folder.join("DryValleys.vrt").exists());
}

#[test]
fn test_split_folder_covers_every_band() {
    let ws = workspace();
    let folder = ws.config.output_folder.clone();
    fs::create_dir_all(&folder).unwrap();
    write_geotiff(&folder.join("RossIsland.tif"), -77.85, 166.70, 4, true);

    let table = BandKeyTable::from_labels(&["coastal", "blue", "green", "red"]).unwrap();
    let mut manifest = RunManifest::default();
    pipeline::split_folder(
        &folder,
        "tif",
        &folder,
        &CopyTools::default(),
        pipeline::BandOptions {
            table: &table,
            policy: UnknownBandPolicy::FailFast,
            remove_source: true,
        },
        &mut manifest,
    )
    .unwrap();

    assert_eq!(manifest.mosaics.len(), 1);
    assert_eq!(manifest.mosaics[0].bands.len(), 4);
    assert_eq!(
        file_names(&folder),
        [
            "RossIsland_blue.tif",
            "RossIsland_coastal.tif",
            "RossIsland_green.tif",
            "RossIsland_red.tif",
        ]
    );
    // Each file holds exactly its own band
    assert_eq!(
        fs::read(folder.join("RossIsland_green.tif")).unwrap(),
        (0..16).map(|i| (i + 30) as u8).collect::<Vec<u8>>()
    );
}
