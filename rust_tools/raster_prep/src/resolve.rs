use crate::catalog::RegionRecord;
use crate::crs;
use crate::error::{PrepError, Result};
use crate::geodesy::{haversine_km, GeoPoint};
use crate::raster::RasterAsset;

#[derive(Debug, Clone, PartialEq)]
pub struct NearestRegion {
    pub name: String,
    /// Position of the winning record in the coordinate table
    pub index: usize,
    pub distance_km: f64,
}

/// Closest record to `center`; ties keep the earliest record in table order.
pub fn nearest_region(center: GeoPoint, records: &[RegionRecord]) -> Result<NearestRegion> {
    let mut best: Option<(usize, f64)> = None;

    for (index, record) in records.iter().enumerate() {
        let distance = haversine_km(center, record.location);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }

    let (index, distance_km) = best.ok_or(PrepError::NoRegionsConfigured)?;
    Ok(NearestRegion {
        name: records[index].name.clone(),
        index,
        distance_km,
    })
}

/// Geographic center of an asset, reprojected from its native CRS
pub fn geographic_center(asset: &RasterAsset) -> Result<GeoPoint> {
    let (x, y) = asset.metadata.center_coordinate();
    crs::to_geographic(&asset.path, &asset.metadata.projection, x, y)
}
