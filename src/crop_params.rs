use serde::Serialize;

use crate::error::{CropError, Result};

/// Rectangle in PDF user space: lower-left (x1, y1), upper-right (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rectangle {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Padding added around a rectangle, one value per edge
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MarginQuad {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

/// Odd page indices use `primary`, even indices (the first page included) use `alternate`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MarginPolicy {
    pub primary: MarginQuad,
    pub alternate: MarginQuad,
}

impl Rectangle {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_degenerate(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Grow every edge outward by the matching margin.
    pub fn expand(self, m: &MarginQuad) -> Rectangle {
        Rectangle {
            x1: self.x1 - m.left,
            y1: self.y1 - m.bottom,
            x2: self.x2 + m.right,
            y2: self.y2 + m.top,
        }
    }
}

impl MarginQuad {
    pub const fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }

    pub const fn uniform(v: f64) -> Self {
        Self::new(v, v, v, v)
    }
}

impl MarginPolicy {
    /// Without an alternate quad every page gets `primary`.
    pub fn new(primary: MarginQuad, alternate: Option<MarginQuad>) -> Self {
        Self {
            primary,
            alternate: alternate.unwrap_or(primary),
        }
    }

    pub fn for_page(&self, page_index: usize) -> &MarginQuad {
        if page_index % 2 == 0 { &self.alternate } else { &self.primary }
    }
}

/// Final crop rectangle for the page at `page_index` (0-based).
///
/// No clamping against the MediaBox happens here; a CropBox larger than the
/// media is legal and the caller decides whether that is wanted.
pub fn compute(rect: Rectangle, page_index: usize, policy: &MarginPolicy) -> Rectangle {
    rect.expand(policy.for_page(page_index))
}

fn parse_numbers(s: &str, what: &str) -> Result<Vec<f64>> {
    s.split(|c: char| c.is_ascii_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>().map_err(|_| {
                CropError::InvalidOption(format!("{what}: {t:?} is not a number"))
            })
        })
        .collect()
}

/// Parse `"<x1> <y1> <x2> <y2>"`.
pub fn parse_rectangle(s: &str) -> Result<Rectangle> {
    match parse_numbers(s, "bounding box")?.as_slice() {
        [x1, y1, x2, y2] => Ok(Rectangle::new(*x1, *y1, *x2, *y2)),
        other => Err(CropError::InvalidOption(format!(
            "bounding box needs 4 numbers, got {}",
            other.len()
        ))),
    }
}

/// Parse `"<l> [<b> [<r> [<t>]]]"`, filling missing edges from the ones given:
/// `a` -> `a a a a`, `a b` -> `a b a b`, `a b c` -> `a b c b`.
pub fn parse_margins(s: &str) -> Result<MarginQuad> {
    let quad = match parse_numbers(s, "margin")?.as_slice() {
        [a] => MarginQuad::uniform(*a),
        [a, b] => MarginQuad::new(*a, *b, *a, *b),
        [a, b, c] => MarginQuad::new(*a, *b, *c, *b),
        [a, b, c, d] => MarginQuad::new(*a, *b, *c, *d),
        other => {
            return Err(CropError::InvalidOption(format!(
                "margin takes 1 to 4 numbers, got {}",
                other.len()
            )));
        }
    };
    Ok(quad)
}
