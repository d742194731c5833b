//! Crop PDF pages by appending an incremental update instead of rewriting the file.
//!
//! The original bytes are never touched: updated page objects, a classic xref
//! table and a trailer chained through `/Prev` are appended after `%%EOF`, so
//! earlier revisions (and any signatures over them) stay intact.

pub mod access;
pub mod bounding_boxes;
pub mod crop;
pub mod crop_params;
pub mod error;
pub mod incremental;
pub mod object_bytes;
pub mod process_pages;
pub mod revision_tail;

pub use crop::{CropOptions, CropPlan, CropSummary, crop_file, plan_file};
pub use crop_params::{MarginPolicy, MarginQuad, Rectangle};
pub use error::{CropError, Result};
