use crate::catalog::TierTable;
use crate::error::{PrepError, Result};
use crate::ident::{IdSource, MAX_ID_ATTEMPTS};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// A region in the tier hierarchy. Children keep first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionNode {
    pub name: String,
    pub id: String,
    pub children: Vec<RegionNode>,
}

impl RegionNode {
    fn new(name: &str, id: String) -> Self {
        Self {
            name: name.to_string(),
            id,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of root-to-leaf paths below (and including) this node.
    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(RegionNode::leaf_count).sum()
        }
    }

    pub fn to_exchange(&self) -> HierarchyEntry {
        HierarchyEntry {
            name: self.name.clone(),
            id: self.id.clone(),
            subregions: self.children.iter().map(RegionNode::to_exchange).collect(),
        }
    }
}

/// Serialized form of a node: `{name, id, subregions}`; leaves omit `subregions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEntry {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subregions: Vec<HierarchyEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionTree {
    pub roots: Vec<RegionNode>,
}

impl RegionTree {
    /// Build the tree from validated tier rows, assigning each new node an id.
    ///
    /// Fails up front when `ids` cannot produce one distinct id per node.
    pub fn build(table: &TierTable, ids: &dyn IdSource) -> Result<Self> {
        let nodes = node_count(table);
        if let Some(capacity) = ids.capacity() {
            if (nodes as u64) > capacity {
                return Err(PrepError::IdSpaceExhausted { nodes, capacity });
            }
        }

        let mut builder = TreeBuilder {
            ids,
            issued: HashSet::new(),
        };
        let mut roots: Vec<RegionNode> = Vec::new();

        for row in table.rows() {
            let mut level = &mut roots;
            for name in &row.tiers {
                let node = builder.child_of(level, name)?;
                level = &mut node.children;
            }
        }

        let tree = Self { roots };
        info!(
            "Built region hierarchy: {} top-level regions, {} leaf regions",
            tree.roots.len(),
            tree.leaf_count()
        );
        Ok(tree)
    }

    pub fn leaf_count(&self) -> usize {
        self.roots.iter().map(RegionNode::leaf_count).sum()
    }

    pub fn to_exchange(&self) -> Vec<HierarchyEntry> {
        self.roots.iter().map(RegionNode::to_exchange).collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        info!("Writing region hierarchy: {}", path.display());
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.to_exchange())?;
        Ok(())
    }
}

struct TreeBuilder<'a> {
    ids: &'a dyn IdSource,
    issued: HashSet<String>,
}

impl TreeBuilder<'_> {
    fn fresh_id(&mut self, name: &str) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            if self.issued.insert(id.clone()) {
                return Ok(id);
            }
            debug!("Region id {} already issued, drawing another", id);
        }
        Err(PrepError::IdentifierCollision {
            stem: name.to_string(),
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    fn child_of<'n>(&mut self, level: &'n mut Vec<RegionNode>, name: &str) -> Result<&'n mut RegionNode> {
        let idx = match level.iter().position(|n| n.name == name) {
            Some(idx) => idx,
            None => {
                let id = self.fresh_id(name)?;
                level.push(RegionNode::new(name, id));
                level.len() - 1
            }
        };
        Ok(&mut level[idx])
    }
}

/// Distinct tier prefixes in the table, i.e. the nodes the tree will hold.
fn node_count(table: &TierTable) -> usize {
    let mut prefixes: HashSet<&[String]> = HashSet::new();
    for row in table.rows() {
        for depth in 1..=row.tiers.len() {
            prefixes.insert(&row.tiers[..depth]);
        }
    }
    prefixes.len()
}
