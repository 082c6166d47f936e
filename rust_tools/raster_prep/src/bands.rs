use crate::error::{PrepError, Result};
use crate::tools::RasterTools;
use gdal::Dataset;
use log::{info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// What to do with a band index the table has no label for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownBandPolicy {
    /// Refuse the raster before extracting anything
    #[default]
    FailFast,
    /// Extract the labeled bands and skip the rest
    Skip,
}

#[derive(Debug, Deserialize)]
struct BandEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BandKeyFile {
    /// `[{"name": "red"}, ...]`, position i labels band i + 1
    List(Vec<BandEntry>),
    /// `{"1": "red", ...}`
    Map(BTreeMap<String, String>),
}

/// 1-based band index to canonical band label.
#[derive(Debug, Clone, PartialEq)]
pub struct BandKeyTable {
    labels: BTreeMap<usize, String>,
}

impl BandKeyTable {
    pub fn new(labels: BTreeMap<usize, String>) -> Result<Self> {
        if labels.contains_key(&0) {
            return Err(PrepError::InvalidBandTable(
                "band indices start at 1".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for (index, label) in &labels {
            if label.trim().is_empty() {
                return Err(PrepError::InvalidBandTable(format!(
                    "band {} has an empty label",
                    index
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(PrepError::InvalidBandTable(format!(
                    "label '{}' is used by more than one band",
                    label
                )));
            }
        }
        Ok(Self { labels })
    }

    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        Self::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, l)| (i + 1, l.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        info!("Reading band names: {}", path.display());
        let table = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!("Found {} band labels", table.len());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let file: BandKeyFile = serde_json::from_reader(reader)?;
        match file {
            BandKeyFile::List(entries) => {
                let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
                Self::from_labels(&names)
            }
            BandKeyFile::Map(map) => {
                let mut labels = BTreeMap::new();
                for (key, label) in map {
                    let index = key.trim().parse::<usize>().map_err(|_| {
                        PrepError::InvalidBandTable(format!("'{}' is not a band index", key))
                    })?;
                    labels.insert(index, label);
                }
                Self::new(labels)
            }
        }
    }

    pub fn label(&self, band: usize) -> Option<&str> {
        self.labels.get(&band).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandSplit {
    pub outputs: Vec<(usize, PathBuf)>,
    pub skipped: Vec<usize>,
    pub source_removed: bool,
}

/// `<output_dir>/<stem>_<label>.<ext>` for `source`.
pub fn band_output_path(source: &Path, label: &str, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tif".to_string());
    output_dir.join(format!("{}_{}.{}", stem, label, extension))
}

/// Extract bands 1..=band_count of `source` into single-band files.
///
/// The source is removed only when every band was written and `remove_source`
/// is set.
pub fn split_bands(
    source: &Path,
    band_count: usize,
    table: &BandKeyTable,
    output_dir: &Path,
    tools: &dyn RasterTools,
    policy: UnknownBandPolicy,
    remove_source: bool,
) -> Result<BandSplit> {
    if table.is_empty() {
        return Err(PrepError::InvalidBandTable("no band labels".to_string()));
    }
    if policy == UnknownBandPolicy::FailFast {
        if let Some(missing) = (1..=band_count).find(|&b| table.label(b).is_none()) {
            return Err(PrepError::UnknownBand(missing));
        }
    }

    let mut split = BandSplit::default();
    for band in 1..=band_count {
        let Some(label) = table.label(band) else {
            warn!("\t\tno label for band {} of {}, skipping", band, source.display());
            split.skipped.push(band);
            continue;
        };

        let output = band_output_path(source, label, output_dir);
        tools.extract_band(source, band, &output)?;
        info!("\t\t\t{}", output.display());
        split.outputs.push((band, output));
    }

    if remove_source && split.skipped.is_empty() {
        fs::remove_file(source)?;
        split.source_removed = true;
    }
    Ok(split)
}

/// Open `source` to count its bands, then split it.
pub fn split_raster(
    source: &Path,
    table: &BandKeyTable,
    output_dir: &Path,
    tools: &dyn RasterTools,
    policy: UnknownBandPolicy,
    remove_source: bool,
) -> Result<BandSplit> {
    let band_count = {
        let dataset = Dataset::open(source)?;
        dataset.raster_count() as usize
    };
    info!("{}: band extraction ({} bands)", source.display(), band_count);
    split_bands(source, band_count, table, output_dir, tools, policy, remove_source)
}
