//! External GDAL command-line tools used to build mosaics and extract bands.
//!
//! Every invocation passes an explicit argument vector (no shell) and runs
//! under a timeout; an expired tool is killed and reported as
//! `ExternalToolTimeout`.

use crate::error::{PrepError, Result};
use log::debug;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tool contracts the mosaic assembler and band splitter depend on.
pub trait RasterTools: Send + Sync {
    /// Write a virtual mosaic descriptor referencing `inputs` without copying pixels.
    fn build_virtual_mosaic(&self, inputs: &[PathBuf], descriptor: &Path, nodata: Option<f64>)
        -> Result<()>;

    /// Materialize `input` as a tiled raster at `output`.
    fn translate(&self, input: &Path, output: &Path, nodata: Option<f64>) -> Result<()>;

    /// Write the 1-based `band` of `input` as a single-band raster at `output`.
    fn extract_band(&self, input: &Path, band: usize, output: &Path) -> Result<()>;
}

/// `gdalbuildvrt` / `gdal_translate` found on PATH (or at configured locations).
#[derive(Debug, Clone)]
pub struct GdalTools {
    pub buildvrt: String,
    pub translate: String,
    pub timeout: Duration,
}

impl Default for GdalTools {
    fn default() -> Self {
        Self {
            buildvrt: "gdalbuildvrt".to_string(),
            translate: "gdal_translate".to_string(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl GdalTools {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl RasterTools for GdalTools {
    fn build_virtual_mosaic(
        &self,
        inputs: &[PathBuf],
        descriptor: &Path,
        nodata: Option<f64>,
    ) -> Result<()> {
        let args = buildvrt_args(inputs, descriptor, nodata);
        run_tool(&self.buildvrt, &args, self.timeout)
            .map_err(|f| f.into_mosaic_error(&self.buildvrt, self.timeout))
    }

    fn translate(&self, input: &Path, output: &Path, nodata: Option<f64>) -> Result<()> {
        let args = translate_args(input, output, nodata);
        run_tool(&self.translate, &args, self.timeout)
            .map_err(|f| f.into_mosaic_error(&self.translate, self.timeout))
    }

    fn extract_band(&self, input: &Path, band: usize, output: &Path) -> Result<()> {
        let args = band_args(input, band, output);
        run_tool(&self.translate, &args, self.timeout)
            .map_err(|f| f.into_band_error(&self.translate, band, self.timeout))
    }
}

/// `gdalbuildvrt -q [-srcnodata V -vrtnodata V] <descriptor> <inputs...>`
pub fn buildvrt_args(inputs: &[PathBuf], descriptor: &Path, nodata: Option<f64>) -> Vec<String> {
    let mut args = vec!["-q".to_string()];
    if let Some(v) = nodata {
        args.push("-srcnodata".to_string());
        args.push(v.to_string());
        args.push("-vrtnodata".to_string());
        args.push(v.to_string());
    }
    args.push(path_arg(descriptor));
    args.extend(inputs.iter().map(|p| path_arg(p)));
    args
}

/// `gdal_translate -q -of GTiff -co TILED=YES [-a_nodata V] <input> <output>`
pub fn translate_args(input: &Path, output: &Path, nodata: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "-q".to_string(),
        "-of".to_string(),
        "GTiff".to_string(),
        "-co".to_string(),
        "TILED=YES".to_string(),
    ];
    if let Some(v) = nodata {
        args.push("-a_nodata".to_string());
        args.push(v.to_string());
    }
    args.push(path_arg(input));
    args.push(path_arg(output));
    args
}

/// `gdal_translate -q -b <band> <input> <output>`
pub fn band_args(input: &Path, band: usize, output: &Path) -> Vec<String> {
    vec![
        "-q".to_string(),
        "-b".to_string(),
        band.to_string(),
        path_arg(input),
        path_arg(output),
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug)]
pub enum ToolFailure {
    Launch(std::io::Error),
    Timeout,
    Exit { status: String, stderr: String },
}

impl ToolFailure {
    fn into_mosaic_error(self, tool: &str, timeout: Duration) -> PrepError {
        match self {
            ToolFailure::Exit { status, stderr } => PrepError::MosaicToolError {
                tool: tool.to_string(),
                status,
                stderr,
            },
            other => other.into_common_error(tool, timeout),
        }
    }

    fn into_band_error(self, tool: &str, band: usize, timeout: Duration) -> PrepError {
        match self {
            ToolFailure::Exit { status, stderr } => PrepError::BandToolError {
                band,
                status,
                stderr,
            },
            other => other.into_common_error(tool, timeout),
        }
    }

    fn into_common_error(self, tool: &str, timeout: Duration) -> PrepError {
        match self {
            ToolFailure::Launch(source) => PrepError::ToolLaunch {
                tool: tool.to_string(),
                source,
            },
            ToolFailure::Timeout => PrepError::ExternalToolTimeout {
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            },
            ToolFailure::Exit { status, stderr } => PrepError::MosaicToolError {
                tool: tool.to_string(),
                status,
                stderr,
            },
        }
    }
}

/// Run `program` with `args`, killing it once `timeout` elapses.
pub fn run_tool(program: &str, args: &[String], timeout: Duration) -> std::result::Result<(), ToolFailure> {
    debug!("[RUNNING]: {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ToolFailure::Launch)?;

    // Drain stderr on its own thread so a chatty tool never blocks on a full pipe
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            text
        })
    });
    let collect_stderr = |reader: Option<thread::JoinHandle<String>>| {
        reader
            .and_then(|h| h.join().ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = collect_stderr(stderr_reader);
                if status.success() {
                    return Ok(());
                }
                return Err(ToolFailure::Exit {
                    status: status.to_string(),
                    stderr,
                });
            }
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    collect_stderr(stderr_reader);
                    return Err(ToolFailure::Timeout);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolFailure::Launch(e));
            }
        }
    }
}
