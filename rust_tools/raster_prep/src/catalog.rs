//! Region tables: the tiered region table and the region-coordinate table.

use crate::error::{PrepError, Result};
use crate::geodesy::GeoPoint;
use crate::rekey::SEPARATOR;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Characters a tier name may not contain: the staged-name separator and
/// path separators.
const RESERVED_CHARS: [char; 3] = [SEPARATOR, '/', '\\'];

/// File-name token of a tier name: the name with all whitespace removed.
pub fn region_token(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// One data row of the tier table, tier1 first.
#[derive(Debug, Clone, PartialEq)]
pub struct TierRow {
    pub line: u64,
    pub tiers: Vec<String>,
}

impl TierRow {
    pub fn lowest(&self) -> &str {
        self.tiers.last().map(String::as_str).unwrap_or_default()
    }
}

/// Rows of the tier table, validated to share the header's tier depth.
#[derive(Debug, Clone)]
pub struct TierTable {
    depth: usize,
    rows: Vec<TierRow>,
    by_lowest: HashMap<String, usize>,
}

impl TierTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        info!("Reading region table: {}", path.display());
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = table_reader(reader);
        let depth = rdr.headers()?.len();
        if depth == 0 {
            return Err(PrepError::MalformedRow {
                line: 1,
                expected: 1,
                found: 0,
            });
        }

        let mut rows: Vec<TierRow> = Vec::new();
        let mut by_lowest: HashMap<String, usize> = HashMap::new();
        let mut tokens: HashMap<String, String> = HashMap::new();

        for result in rdr.records() {
            let record = result?;
            let line = record_line(&record);

            if record.len() != depth || record.iter().any(str::is_empty) {
                return Err(PrepError::MalformedRow {
                    line,
                    expected: depth,
                    found: record.iter().filter(|v| !v.is_empty()).count(),
                });
            }

            let row = TierRow {
                line,
                tiers: record.iter().map(str::to_string).collect(),
            };

            for name in &row.tiers {
                if let Some(c) = name.chars().find(|c| RESERVED_CHARS.contains(c)) {
                    return Err(PrepError::InvalidTierName {
                        line,
                        name: name.clone(),
                        reason: format!("'{}' is reserved in staged file names", c),
                    });
                }
                let token = region_token(name);
                match tokens.get(&token) {
                    Some(first) if first != name => {
                        return Err(PrepError::AmbiguousTierToken {
                            token,
                            first: first.clone(),
                            name: name.clone(),
                            line,
                        });
                    }
                    Some(_) => {}
                    None => {
                        tokens.insert(token, name.clone());
                    }
                }
            }

            match by_lowest.get(row.lowest()) {
                Some(&first) if rows[first].tiers != row.tiers => {
                    return Err(PrepError::DuplicateLowestTier {
                        name: row.lowest().to_string(),
                        first_line: rows[first].line,
                        line,
                    });
                }
                Some(_) => debug!("Repeated region row at line {}", line),
                None => {
                    by_lowest.insert(row.lowest().to_string(), rows.len());
                }
            }
            rows.push(row);
        }

        debug!("Region table: {} rows, {} tiers, {} names", rows.len(), depth, tokens.len());
        Ok(Self {
            depth,
            rows,
            by_lowest,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn rows(&self) -> &[TierRow] {
        &self.rows
    }

    /// Ancestor chain (tier1..tierN) of the first row whose lowest tier is `name`.
    pub fn chain_for(&self, name: &str) -> Result<&[String]> {
        self.by_lowest
            .get(name)
            .map(|&idx| self.rows[idx].tiers.as_slice())
            .ok_or_else(|| PrepError::RegionNotFound(name.to_string()))
    }
}

/// A named region and its reference coordinate, in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRecord {
    pub name: String,
    pub location: GeoPoint,
}

pub fn read_region_records(path: &Path) -> Result<Vec<RegionRecord>> {
    info!("Reading region coordinates: {}", path.display());
    let records = region_records_from_reader(File::open(path)?)?;
    info!("Found {} regions in key file", records.len());
    Ok(records)
}

/// Parse `name, latitude, longitude` rows after a header row.
pub fn region_records_from_reader<R: Read>(reader: R) -> Result<Vec<RegionRecord>> {
    let mut rdr = table_reader(reader);
    let mut records: Vec<RegionRecord> = Vec::new();
    let mut seen: HashMap<String, u64> = HashMap::new();

    for result in rdr.records() {
        let record = result?;
        let line = record_line(&record);

        if record.len() < 3 || record[0].is_empty() {
            return Err(PrepError::InvalidCoordinate {
                line,
                reason: "expected name, latitude, longitude".to_string(),
            });
        }

        let lat = parse_degrees(&record[1], line)?;
        let lon = parse_degrees(&record[2], line)?;
        let location = GeoPoint::new(lat, lon);
        if !location.is_valid() {
            return Err(PrepError::InvalidCoordinate {
                line,
                reason: format!("({}, {}) is out of range", lat, lon),
            });
        }

        if let Some(first) = seen.insert(record[0].to_string(), line) {
            return Err(PrepError::InvalidCoordinate {
                line,
                reason: format!("region '{}' already listed at line {}", &record[0], first),
            });
        }

        records.push(RegionRecord {
            name: record[0].to_string(),
            location,
        });
    }

    Ok(records)
}

fn table_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or_default()
}

fn parse_degrees(value: &str, line: u64) -> Result<f64> {
    value.parse::<f64>().map_err(|e| PrepError::InvalidCoordinate {
        line,
        reason: format!("'{}': {}", value, e),
    })
}
