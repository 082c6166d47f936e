use crate::error::Result;
use crate::geodesy::GeoPoint;
use gdal::Dataset;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of the sidecar header that travels with each raster.
pub const HEADER_EXTENSION: &str = "hdr";

#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    /// Projected coordinate of the center of pixel (height / 2, width / 2).
    pub fn center_coordinate(&self) -> (f64, f64) {
        let col = (self.width / 2) as f64 + 0.5;
        let row = (self.height / 2) as f64 + 0.5;
        let gt = &self.geotransform;
        let x = gt[0] + col * gt[1] + row * gt[2];
        let y = gt[3] + col * gt[4] + row * gt[5];
        (x, y)
    }

    /// (min_x, min_y, max_x, max_y) in the raster's own CRS.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geotransform;
        let corners = [
            (0.0, 0.0),
            (self.width as f64, 0.0),
            (0.0, self.height as f64),
            (self.width as f64, self.height as f64),
        ];
        corners.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), &(col, row)| {
                let x = gt[0] + col * gt[1] + row * gt[2];
                let y = gt[3] + col * gt[4] + row * gt[5];
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}

/// One input image and, once classified, where it landed in the hierarchy.
#[derive(Debug, Clone)]
pub struct RasterAsset {
    pub path: PathBuf,
    pub header_path: Option<PathBuf>,
    pub metadata: RasterMetadata,
    pub center: Option<GeoPoint>,
    pub region_path: Vec<String>,
    pub unique_id: Option<String>,
}

impl RasterAsset {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        let metadata = extract_metadata_from_dataset(&dataset)?;
        let header = sidecar_path(path);

        Ok(Self {
            path: path.to_path_buf(),
            header_path: header.is_file().then_some(header),
            metadata,
            center: None,
            region_path: Vec::new(),
            unique_id: None,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Read size, band count, georeferencing and nodata without touching pixels
pub fn extract_metadata_from_dataset(dataset: &Dataset) -> Result<RasterMetadata> {
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    let nodata = if band_count > 0 {
        dataset.rasterband(1)?.no_data_value()
    } else {
        None
    };

    let metadata = RasterMetadata {
        width: width as usize,
        height: height as usize,
        band_count,
        geotransform: dataset.geo_transform()?,
        projection: dataset.projection(),
        nodata,
    };

    debug!("\tbounds: {:?}", metadata.bounds());
    debug!("\tnbands: {}", metadata.band_count);
    debug!("\tcrs: {}", summarize_wkt(&metadata.projection));
    debug!("\tnodata: {:?}", metadata.nodata);

    Ok(metadata)
}

/// `<dir>/<stem>.hdr` for a raster at `<dir>/<stem>.<ext>`.
pub fn sidecar_path(raster: &Path) -> PathBuf {
    raster.with_extension(HEADER_EXTENSION)
}

/// Rasters directly inside `dir` with the given extension, sorted by file name.
pub fn list_rasters(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, extension))
        .collect();
    paths.sort();

    info!(
        "Found {} .{} rasters in {}",
        paths.len(),
        extension,
        dir.display()
    );
    Ok(paths)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn summarize_wkt(wkt: &str) -> &str {
    // PROJCS["name",... / GEOGCS["name",...
    wkt.split('"').nth(1).unwrap_or(wkt)
}
