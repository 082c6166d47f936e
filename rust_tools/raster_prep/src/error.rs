use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed row at line {line}: expected {expected} tier columns, found {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Region '{name}' appears as lowest tier with different ancestors (lines {first_line} and {line})")]
    DuplicateLowestTier {
        name: String,
        first_line: u64,
        line: u64,
    },

    #[error("Invalid tier name '{name}' at line {line}: {reason}")]
    InvalidTierName {
        line: u64,
        name: String,
        reason: String,
    },

    #[error("Tier names '{first}' and '{name}' (line {line}) both reduce to token '{token}'")]
    AmbiguousTierToken {
        token: String,
        first: String,
        name: String,
        line: u64,
    },

    #[error("Invalid coordinate at line {line}: {reason}")]
    InvalidCoordinate { line: u64, reason: String },

    #[error("Projection error for {path}: {reason}")]
    ProjectionError { path: PathBuf, reason: String },

    #[error("No regions configured")]
    NoRegionsConfigured,

    #[error("Sidecar header missing: {0}")]
    SidecarMissing(PathBuf),

    #[error("Region not found in tier table: {0}")]
    RegionNotFound(String),

    #[error("Could not find a free identifier for {stem} after {attempts} attempts")]
    IdentifierCollision { stem: String, attempts: usize },

    #[error("Identifier width too small: {nodes} regions need ids but only {capacity} exist")]
    IdSpaceExhausted { nodes: usize, capacity: u64 },

    #[error("Mosaic tool {tool} failed ({status}): {stderr}")]
    MosaicToolError {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Band extraction failed for band {band} ({status}): {stderr}")]
    BandToolError {
        band: usize,
        status: String,
        stderr: String,
    },

    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {seconds} s")]
    ExternalToolTimeout { tool: String, seconds: u64 },

    #[error("No band label for band index {0}")]
    UnknownBand(usize),

    #[error("Invalid band table: {0}")]
    InvalidBandTable(String),

    #[error("Mosaic group '{0}' has no members")]
    EmptyGroup(String),
}

pub type Result<T> = std::result::Result<T, PrepError>;
