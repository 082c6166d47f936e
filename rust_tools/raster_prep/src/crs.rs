use crate::error::{PrepError, Result};
use crate::geodesy::GeoPoint;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use log::debug;
use std::path::Path;

pub const GEOGRAPHIC_EPSG: u32 = 4326;

/// Reproject an (x, y) coordinate in `projection_wkt` into WGS84 lat/lon
pub fn to_geographic(path: &Path, projection_wkt: &str, x: f64, y: f64) -> Result<GeoPoint> {
    let fail = |reason: String| PrepError::ProjectionError {
        path: path.to_path_buf(),
        reason,
    };

    if projection_wkt.trim().is_empty() {
        return Err(fail("raster has no coordinate reference system".to_string()));
    }

    let mut source = SpatialRef::from_wkt(projection_wkt)
        .map_err(|e| fail(format!("unreadable CRS: {}", e)))?;
    let mut target = SpatialRef::from_epsg(GEOGRAPHIC_EPSG).map_err(|e| fail(e.to_string()))?;

    // Geotransform coordinates are always x/easting first
    source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    let transform =
        CoordTransform::new(&source, &target).map_err(|e| fail(format!("no transform: {}", e)))?;

    let mut xs = [x];
    let mut ys = [y];
    let mut zs = [0.0];
    transform
        .transform_coords(&mut xs, &mut ys, &mut zs)
        .map_err(|e| fail(format!("transform failed: {}", e)))?;

    // TraditionalGisOrder: xs = longitude, ys = latitude
    let point = GeoPoint::new(ys[0], xs[0]);
    if !point.is_valid() {
        return Err(fail(format!("({}, {}) is not a valid lat/lon", ys[0], xs[0])));
    }

    debug!("\tcenter ({:.3}, {:.3}) -> lat {:.5}, lon {:.5}", x, y, point.lat, point.lon);
    Ok(point)
}
