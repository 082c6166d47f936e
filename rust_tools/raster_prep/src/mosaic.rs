use crate::error::{PrepError, Result};
use crate::raster::list_rasters;
use crate::rekey::SEPARATOR;
use crate::tools::RasterTools;
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Staged files sharing one hierarchy token, and where their mosaic goes.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicGroup {
    pub token: String,
    pub members: Vec<PathBuf>,
    pub output: PathBuf,
}

impl MosaicGroup {
    pub fn descriptor(&self) -> PathBuf {
        self.output.with_extension("vrt")
    }
}

/// Tier tokens of a staged file name, without the trailing identifier.
pub fn tier_tokens(path: &Path) -> Vec<String> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tokens: Vec<String> = stem.split(SEPARATOR).map(str::to_string).collect();
    tokens.pop();
    tokens.retain(|t| !t.is_empty());
    tokens
}

/// One group per distinct token, in order of first appearance across `staged`.
///
/// A file joins a group only when one of its delimited tokens equals the
/// group token exactly; `Ross` never matches `RossIsland`.
pub fn group_staged_files(staged: &[PathBuf], output_dir: &Path, extension: &str) -> Vec<MosaicGroup> {
    let mut groups: Vec<MosaicGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for path in staged {
        let mut tokens = tier_tokens(path);
        if tokens.is_empty() {
            warn!("Skipping {}: no region tokens in name", path.display());
            continue;
        }
        // A token repeated across tiers still lists the file once
        let mut seen = std::collections::HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));

        for token in tokens {
            let idx = *index.entry(token.clone()).or_insert_with(|| {
                groups.push(MosaicGroup {
                    output: output_dir.join(format!("{}.{}", token, extension)),
                    token: token.clone(),
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[idx].members.push(path.clone());
        }
    }

    groups
}

/// Keep only the groups named in `only` (all groups when `only` is empty).
pub fn select_groups(groups: Vec<MosaicGroup>, only: &[String]) -> Vec<MosaicGroup> {
    if only.is_empty() {
        return groups;
    }
    for name in only {
        if !groups.iter().any(|g| &g.token == name) {
            warn!("Requested mosaic group '{}' has no staged rasters", name);
        }
    }
    groups
        .into_iter()
        .filter(|g| only.contains(&g.token))
        .collect()
}

/// Enumerate the staging directory and group its rasters.
pub fn plan_mosaics(staging_dir: &Path, output_dir: &Path, extension: &str) -> Result<Vec<MosaicGroup>> {
    let staged = list_rasters(staging_dir, extension)?;
    let groups = group_staged_files(&staged, output_dir, extension);
    info!("{} mosaic groups from {} staged rasters", groups.len(), staged.len());
    Ok(groups)
}

/// Build the group's virtual mosaic, materialize it, and drop the descriptor.
///
/// On failure any partially written output is removed as well.
pub fn assemble_group(group: &MosaicGroup, tools: &dyn RasterTools, nodata: Option<f64>) -> Result<PathBuf> {
    if group.members.is_empty() {
        return Err(PrepError::EmptyGroup(group.token.clone()));
    }

    info!("Group: {} ({} rasters)", group.token, group.members.len());
    let descriptor = group.descriptor();

    let built = tools
        .build_virtual_mosaic(&group.members, &descriptor, nodata)
        .and_then(|_| tools.translate(&descriptor, &group.output, nodata));

    remove_if_present(&descriptor);
    if built.is_err() {
        remove_if_present(&group.output);
    }

    built?;
    info!("\tmosaic written: {}", group.output.display());
    Ok(group.output.clone())
}

fn remove_if_present(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/staging").join(n)).collect()
    }

    #[test]
    fn test_tier_tokens_drop_identifier() {
        let tokens = tier_tokens(Path::new("/s/VictoriaLand_RossIsland_ScottBase_a1b2.tif"));
        assert_eq!(tokens, ["VictoriaLand", "RossIsland", "ScottBase"]);
        assert!(tier_tokens(Path::new("/s/loose.tif")).is_empty());
    }

    #[test]
    fn test_groups_cover_every_token() {
        let staged = paths(&[
            "RossIsland_McMurdoStation_0000.tif",
            "RossIsland_ScottBase_0001.tif",
            "DryValleys_TaylorValley_0002.tif",
        ]);
        let groups = group_staged_files(&staged, Path::new("/out"), "tif");

        let tokens: Vec<&str> = groups.iter().map(|g| g.token.as_str()).collect();
        assert_eq!(
            tokens,
            ["RossIsland", "McMurdoStation", "ScottBase", "DryValleys", "TaylorValley"]
        );
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].output, PathBuf::from("/out/RossIsland.tif"));
        assert_eq!(groups[0].descriptor(), PathBuf::from("/out/RossIsland.vrt"));
        assert_eq!(groups[3].members, paths(&["DryValleys_TaylorValley_0002.tif"]));
    }

    #[test]
    fn test_membership_is_exact_token_match() {
        let staged = paths(&["Ross_Peak_0000.tif", "RossIsland_Base_0001.tif"]);
        let groups = group_staged_files(&staged, Path::new("/out"), "tif");

        let ross = groups.iter().find(|g| g.token == "Ross").unwrap();
        assert_eq!(ross.members, paths(&["Ross_Peak_0000.tif"]));
        let island = groups.iter().find(|g| g.token == "RossIsland").unwrap();
        assert_eq!(island.members, paths(&["RossIsland_Base_0001.tif"]));
    }

    #[test]
    fn test_repeated_token_listed_once() {
        let staged = paths(&["Shackleton_Shackleton_MountCole_0000.tif"]);
        let groups = group_staged_files(&staged, Path::new("/out"), "tif");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len(), 1);
    }

    #[test]
    fn test_select_groups() {
        let staged = paths(&["A_B_0000.tif", "A_C_0001.tif"]);
        let groups = group_staged_files(&staged, Path::new("/out"), "tif");
        assert_eq!(select_groups(groups.clone(), &[]).len(), 3);

        let picked = select_groups(groups, &["C".to_string(), "Z".to_string()]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].token, "C");
    }

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<String>>,
        fail_translate: bool,
    }

    impl RasterTools for RecordingTools {
        fn build_virtual_mosaic(&self, inputs: &[PathBuf], descriptor: &Path, _: Option<f64>) -> Result<()> {
            fs::write(descriptor, b"<VRTDataset/>")?;
            self.calls.lock().unwrap().push(format!("vrt {}", inputs.len()));
            Ok(())
        }

        fn translate(&self, input: &Path, output: &Path, nodata: Option<f64>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("translate {:?}", nodata));
            if self.fail_translate {
                // Killed partway through writing
                fs::write(output, b"mos")?;
                return Err(PrepError::MosaicToolError {
                    tool: "gdal_translate".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: format!("cannot open {}", input.display()),
                });
            }
            fs::write(output, b"mosaic")?;
            Ok(())
        }

        fn extract_band(&self, _: &Path, _: usize, _: &Path) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn test_assemble_group_removes_descriptor() {
        let out = tempfile::tempdir().unwrap();
        let group = MosaicGroup {
            token: "RossIsland".to_string(),
            members: paths(&["RossIsland_ScottBase_0000.tif"]),
            output: out.path().join("RossIsland.tif"),
        };
        let tools = RecordingTools::default();

        let written = assemble_group(&group, &tools, Some(0.0)).unwrap();
        assert_eq!(written, out.path().join("RossIsland.tif"));
        assert!(written.exists());
        assert!(!group.descriptor().exists());
        assert_eq!(*tools.calls.lock().unwrap(), ["vrt 1", "translate Some(0.0)"]);
    }

    #[test]
    fn test_failed_translate_removes_descriptor_and_partial_output() {
        let out = tempfile::tempdir().unwrap();
        let group = MosaicGroup {
            token: "RossIsland".to_string(),
            members: paths(&["RossIsland_ScottBase_0000.tif"]),
            output: out.path().join("RossIsland.tif"),
        };
        let tools = RecordingTools {
            fail_translate: true,
            ..Default::default()
        };

        let err = assemble_group(&group, &tools, None).unwrap_err();
        assert!(matches!(err, PrepError::MosaicToolError { .. }));
        assert!(!group.descriptor().exists());
        assert!(!group.output.exists());
    }

    #[test]
    fn test_empty_group_is_rejected() {
        let group = MosaicGroup {
            token: "Nowhere".to_string(),
            members: Vec::new(),
            output: PathBuf::from("/out/Nowhere.tif"),
        };
        let err = assemble_group(&group, &RecordingTools::default(), None).unwrap_err();
        assert!(matches!(err, PrepError::EmptyGroup(t) if t == "Nowhere"));
    }
}
