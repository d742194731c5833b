use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::access::{self, SourceDocument};
use crate::bounding_boxes::GeometrySource;
use crate::crop_params::{MarginPolicy, Rectangle};
use crate::error::{CropError, Result};
use crate::incremental::RevisionUpdate;
use crate::process_pages::{self, PageCrop};
use crate::revision_tail;

/// Everything that applies to every input file of one run.
#[derive(Debug, Clone)]
pub struct CropOptions {
    pub geometry: GeometrySource,
    pub margins: MarginPolicy,
    pub outfile: Option<PathBuf>,
    pub password: Option<String>,
}

impl CropOptions {
    /// Choose the geometry source: fixed rectangle, then box file, then detection.
    pub fn geometry(
        bbox: Option<Rectangle>,
        bbox_file: Option<PathBuf>,
        program: PathBuf,
        resolution: u32,
    ) -> Result<GeometrySource> {
        match (bbox, bbox_file) {
            (Some(_), Some(_)) => Err(CropError::ConfigurationConflict(
                "--bbox and --bbox-file cannot be used together".into(),
            )),
            (Some(r), None) => Ok(GeometrySource::Fixed(r)),
            (None, Some(path)) => Ok(GeometrySource::BoxFile(path)),
            (None, None) => Ok(GeometrySource::Detect { program, resolution }),
        }
    }

    /// Reject option combinations before any file is touched.
    pub fn validate(&self, inputs: &[PathBuf]) -> Result<()> {
        if self.outfile.is_some() && inputs.len() > 1 {
            return Err(CropError::ConfigurationConflict(format!(
                "--outfile needs exactly one input, got {}",
                inputs.len()
            )));
        }
        Ok(())
    }
}

/// Crops decided for one file, printed by `--dry-run`.
#[derive(Debug, Clone, Serialize)]
pub struct CropPlan {
    pub input: PathBuf,
    pub prev_xref: u64,
    pub pages: Vec<PageCrop>,
}

/// What one processed file ended up as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropSummary {
    pub output: PathBuf,
    pub pages: usize,
    pub prev_xref: u64,
    pub xref_start: u64,
    pub appended: u64,
}

struct Prepared {
    source: SourceDocument,
    trailer: lopdf::Dictionary,
    plan: CropPlan,
}

fn prepare(input: &Path, opts: &CropOptions) -> Result<Prepared> {
    let bytes = fs::read(input)?;
    let prev_xref = {
        let mut cursor = Cursor::new(&bytes[..]);
        let tail = revision_tail::locate_tail(&mut cursor)?;
        revision_tail::ensure_classic_xref(&mut cursor, tail)?;
        tail
    };

    let mut source = SourceDocument::from_bytes(bytes)?;
    // taken before decryption so /Encrypt and /ID carry over
    let trailer = source.doc.trailer.clone();
    let access = access::negotiate(&mut source, opts.password.as_deref())?;
    tracing::debug!(?access, "document readable");

    let slots = process_pages::page_slots(&source.doc);
    let boxes = opts.geometry.resolve(input)?;
    let pages = process_pages::plan_crops(&slots, &boxes, &opts.margins)?;

    Ok(Prepared {
        source,
        trailer,
        plan: CropPlan {
            input: input.to_path_buf(),
            prev_xref,
            pages,
        },
    })
}

/// Work out the crops for `input` without writing anything.
pub fn plan_file(input: &Path, opts: &CropOptions) -> Result<CropPlan> {
    prepare(input, opts).map(|p| p.plan)
}

/// Crop every page of `input` and append the result as a new revision.
///
/// Writes to `opts.outfile` when set (the input is copied first), otherwise
/// appends to `input` in place.
#[tracing::instrument(skip_all, fields(input = %input.display()))]
pub fn crop_file(input: &Path, opts: &CropOptions) -> Result<CropSummary> {
    let Prepared {
        mut source,
        trailer,
        plan,
    } = prepare(input, opts)?;
    let output = opts.outfile.clone().unwrap_or_else(|| input.to_path_buf());

    if plan.pages.is_empty() {
        tracing::warn!("document has no pages, nothing appended");
        return Ok(CropSummary {
            output,
            pages: 0,
            prev_xref: plan.prev_xref,
            xref_start: plan.prev_xref,
            appended: 0,
        });
    }

    let mut update = RevisionUpdate::new(plan.prev_xref, trailer);
    for crop in &plan.pages {
        let page = process_pages::apply_crop_box(&mut source.doc, crop)?;
        update.insert(crop.reference, page)?;
    }

    let (appended, xref_start) = match &opts.outfile {
        Some(out) => commit_copy(input, out, &update)?,
        None => commit_in_place(input, &update)?,
    };

    Ok(CropSummary {
        output,
        pages: update.len(),
        prev_xref: plan.prev_xref,
        xref_start,
        appended,
    })
}

fn append_revision(file: &mut File, update: &RevisionUpdate) -> Result<(u64, u64)> {
    let base = file.metadata()?.len();
    let (bytes, xref_start) = update.render(base)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok((bytes.len() as u64, xref_start))
}

fn commit_in_place(input: &Path, update: &RevisionUpdate) -> Result<(u64, u64)> {
    let mut file = OpenOptions::new().append(true).open(input)?;
    append_revision(&mut file, update)
}

/// Copy plus append happen in a temp file next to `out`, renamed into place at the end.
fn commit_copy(input: &Path, out: &Path, update: &RevisionUpdate) -> Result<(u64, u64)> {
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut staged = NamedTempFile::new_in(&dir)?;
    io::copy(&mut File::open(input)?, staged.as_file_mut())?;
    let result = append_revision(staged.as_file_mut(), update)?;
    staged.persist(out).map_err(|e| e.error)?;
    // temp files start out 0600
    let permissions = fs::metadata(input).and_then(|meta| fs::set_permissions(out, meta.permissions()));
    if let Err(e) = permissions {
        tracing::warn!(output = %out.display(), error = %e, "could not copy the input's permissions");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop_params::MarginQuad;

    fn opts(outfile: Option<&str>) -> CropOptions {
        CropOptions {
            geometry: GeometrySource::Fixed(Rectangle::new(0.0, 0.0, 1.0, 1.0)),
            margins: MarginPolicy::new(MarginQuad::default(), None),
            outfile: outfile.map(PathBuf::from),
            password: None,
        }
    }

    #[test]
    fn outfile_with_several_inputs_conflicts() {
        let inputs = vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")];
        assert!(matches!(
            opts(Some("out.pdf")).validate(&inputs),
            Err(CropError::ConfigurationConflict(_))
        ));
        assert!(opts(Some("out.pdf")).validate(&inputs[..1]).is_ok());
        assert!(opts(None).validate(&inputs).is_ok());
    }

    #[test]
    fn geometry_selection() {
        let r = Rectangle::new(1.0, 2.0, 3.0, 4.0);
        let gs = PathBuf::from("gs");
        assert_eq!(
            CropOptions::geometry(Some(r), None, gs.clone(), 100).unwrap(),
            GeometrySource::Fixed(r)
        );
        assert_eq!(
            CropOptions::geometry(None, Some("b.txt".into()), gs.clone(), 100).unwrap(),
            GeometrySource::BoxFile("b.txt".into())
        );
        assert_eq!(
            CropOptions::geometry(None, None, gs.clone(), 72).unwrap(),
            GeometrySource::Detect { program: gs.clone(), resolution: 72 }
        );
        assert!(matches!(
            CropOptions::geometry(Some(r), Some("b.txt".into()), gs, 100),
            Err(CropError::ConfigurationConflict(_))
        ));
    }

    #[test]
    fn missing_input_is_an_io_error() {
        let err = crop_file(Path::new("/nonexistent/in.pdf"), &opts(None)).unwrap_err();
        assert!(matches!(err, CropError::Io(_)));
    }
}
