// Library exports for testing and reuse

pub mod bands;
pub mod catalog;
pub mod cli;
pub mod crs;
pub mod error;
pub mod geodesy;
pub mod hierarchy;
pub mod ident;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod rekey;
pub mod resolve;
pub mod tools;

// Re-export commonly used types
pub use bands::{BandKeyTable, UnknownBandPolicy};
pub use catalog::{RegionRecord, TierTable};
pub use error::{PrepError, Result};
pub use hierarchy::{RegionNode, RegionTree};
pub use pipeline::{PipelineConfig, RunManifest};
pub use raster::{RasterAsset, RasterMetadata};
pub use rekey::SidecarPolicy;
pub use tools::{GdalTools, RasterTools};
