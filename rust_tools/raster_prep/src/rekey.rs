use crate::error::{PrepError, Result};
use crate::catalog::region_token;
use crate::ident::{IdSource, MAX_ID_ATTEMPTS};
use crate::raster::{sidecar_path, RasterAsset, HEADER_EXTENSION};
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Separator between tier tokens and the trailing identifier in staged names.
pub const SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidecarPolicy {
    /// Copy the header when it exists
    #[default]
    Optional,
    /// Fail the asset when the header is missing
    Required,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedRaster {
    pub source: PathBuf,
    pub raster: PathBuf,
    pub header: Option<PathBuf>,
    pub unique_id: String,
}

/// Tier names joined by the separator, with all whitespace removed.
pub fn hierarchical_stem(chain: &[String]) -> String {
    chain
        .iter()
        .map(|tier| region_token(tier))
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

pub fn staged_file_name(stem: &str, id: &str, extension: &str) -> String {
    format!("{}{}{}.{}", stem, SEPARATOR, id, extension)
}

/// Copy `asset` (and its sidecar) into `staging_dir` as `<tier1>_..._<tierN>_<id>.<ext>`.
///
/// The raster name is reserved with an exclusive create, so two workers can
/// never write the same staged file; a taken name draws a fresh id.
pub fn stage_asset(
    asset: &RasterAsset,
    chain: &[String],
    staging_dir: &Path,
    ids: &dyn IdSource,
    sidecar: SidecarPolicy,
) -> Result<StagedRaster> {
    let header_source = match (&asset.header_path, sidecar) {
        (Some(h), _) => Some(h.clone()),
        (None, SidecarPolicy::Optional) => None,
        (None, SidecarPolicy::Required) => {
            return Err(PrepError::SidecarMissing(sidecar_path(&asset.path)));
        }
    };

    let extension = asset
        .path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tif".to_string());
    let stem = hierarchical_stem(chain);

    for attempt in 1..=MAX_ID_ATTEMPTS {
        let id = ids.next_id();
        let raster_path = staging_dir.join(staged_file_name(&stem, &id, &extension));
        let header_path = staging_dir.join(staged_file_name(&stem, &id, HEADER_EXTENSION));

        let target = match reserve(&raster_path)? {
            Some(file) => file,
            None => {
                debug!(
                    "\t\tstaged name {} taken (attempt {}), drawing a new id",
                    raster_path.display(),
                    attempt
                );
                continue;
            }
        };

        if header_source.is_some() && header_path.exists() {
            drop(target);
            fs::remove_file(&raster_path)?;
            continue;
        }

        let copied = copy_into(&asset.path, target).and_then(|_| match &header_source {
            Some(src) => fs::copy(src, &header_path).map(|_| ()),
            None => Ok(()),
        });
        if let Err(e) = copied {
            let _ = fs::remove_file(&raster_path);
            let _ = fs::remove_file(&header_path);
            return Err(e.into());
        }

        info!("\t\tunique id:\t{}", id);
        info!("\t\tstaged as:\t{}", raster_path.display());

        return Ok(StagedRaster {
            source: asset.path.clone(),
            raster: raster_path,
            header: header_source.map(|_| header_path),
            unique_id: id,
        });
    }

    Err(PrepError::IdentifierCollision {
        stem,
        attempts: MAX_ID_ATTEMPTS,
    })
}

/// Exclusively create `path`; `None` when it already exists.
fn reserve(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn copy_into(source: &Path, mut target: File) -> io::Result<()> {
    let mut input = File::open(source)?;
    io::copy(&mut input, &mut target)?;
    target.sync_all()
}
