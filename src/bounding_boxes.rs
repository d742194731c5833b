use std::fs;
use std::iter;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::crop_params::Rectangle;
use crate::error::{CropError, Result};

/// Line prefix the Ghostscript `bbox` device uses for each page.
pub const BBOX_MARKER: &str = "%%BoundingBox:";

pub const DEFAULT_RESOLUTION: u32 = 100;

/// Where page rectangles come from. Exactly one source is used per run.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometrySource {
    /// One rectangle for every page.
    Fixed(Rectangle),
    /// Text file in `bbox` device format, one marker line per page.
    BoxFile(PathBuf),
    /// Run the detector on the input file at the given resolution.
    Detect { program: PathBuf, resolution: u32 },
}

/// Page-ordered rectangles. `Repeat` never runs out; `Listed` must match the page count.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxSequence {
    Repeat(Rectangle),
    Listed(Vec<Rectangle>),
}

impl BoxSequence {
    /// Number of rectangles, or `None` for an endless sequence.
    pub fn len(&self) -> Option<usize> {
        match self {
            BoxSequence::Repeat(_) => None,
            BoxSequence::Listed(v) => Some(v.len()),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Rectangle> + '_> {
        match self {
            BoxSequence::Repeat(r) => Box::new(iter::repeat(*r)),
            BoxSequence::Listed(v) => Box::new(v.iter().copied()),
        }
    }
}

impl GeometrySource {
    /// Produce the rectangle sequence for `input`.
    pub fn resolve(&self, input: &Path) -> Result<BoxSequence> {
        match self {
            GeometrySource::Fixed(r) => Ok(BoxSequence::Repeat(*r)),
            GeometrySource::BoxFile(path) => {
                let text = fs::read_to_string(path)?;
                Ok(BoxSequence::Listed(parse_bbox_output(&text)?))
            }
            GeometrySource::Detect { program, resolution } => {
                detect(program, *resolution, input).map(BoxSequence::Listed)
            }
        }
    }
}

/// Rectangles from every line starting with [`BBOX_MARKER`], in order. Other lines are ignored.
pub fn parse_bbox_output(text: &str) -> Result<Vec<Rectangle>> {
    let mut boxes = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let Some(rest) = line.strip_prefix(BBOX_MARKER) else {
            continue;
        };
        let malformed = || CropError::MalformedBoundingBox {
            line: n + 1,
            text: line.to_string(),
        };
        let nums = rest
            .split_ascii_whitespace()
            .map(|t| t.parse::<f64>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>>>()?;
        match nums.as_slice() {
            [x1, y1, x2, y2] => boxes.push(Rectangle::new(*x1, *y1, *x2, *y2)),
            _ => return Err(malformed()),
        }
    }
    Ok(boxes)
}

/// Run the `bbox` device over `input` and parse what it prints on stderr.
#[tracing::instrument(skip_all, fields(input = %input.display(), resolution = resolution))]
pub fn detect(program: &Path, resolution: u32, input: &Path) -> Result<Vec<Rectangle>> {
    tracing::info!("determining bounding boxes for {}", input.display());

    let output = Command::new(program)
        .arg("-dBATCH")
        .arg("-dNOPAUSE")
        .arg("-sDEVICE=bbox")
        .arg(format!("-r{resolution}"))
        .arg(input)
        .output()
        .map_err(|e| CropError::DetectionFailed {
            reason: format!("could not run {}: {e}", program.display()),
            diagnostics: String::new(),
        })?;

    let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(CropError::DetectionFailed {
            reason: format!("{} exited with {}", program.display(), output.status),
            diagnostics,
        });
    }

    let boxes = match parse_bbox_output(&diagnostics) {
        Ok(b) => b,
        Err(e) => {
            return Err(CropError::DetectionFailed {
                reason: e.to_string(),
                diagnostics,
            });
        }
    };
    if boxes.is_empty() {
        return Err(CropError::DetectionFailed {
            reason: "detector reported no bounding boxes".into(),
            diagnostics,
        });
    }
    tracing::debug!(count = boxes.len(), "bounding boxes detected");
    Ok(boxes)
}
