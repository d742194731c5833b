//! Appending a revision to an existing document.
//!
//! The appended section looks like:
//! ```text
//! 7 0 obj
//! << ... /CropBox [...] >>
//! endobj
//! xref
//! 7 2
//! 0000012345 00000 n
//! 0000012420 00000 n
//! trailer
//! << /Root 1 0 R /Size 12 /Prev 11800 >>
//! startxref
//! 12495
//! %%EOF
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};

use lopdf::{Dictionary, Object, ObjectId};
use serde::Serialize;

use crate::error::{CropError, Result};
use crate::object_bytes;
use crate::revision_tail::XREF_KEYWORD_LINE;

/// Fixed width of one xref table record, line terminator included.
pub const XREF_RECORD_LEN: usize = 20;

/// Offsets must fit the ten-digit field.
pub const MAX_XREF_OFFSET: u64 = 10_000_000_000;

/// Object number plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndirectReference {
    pub id: u32,
    pub generation: u16,
}

impl IndirectReference {
    pub const fn new(id: u32, generation: u16) -> Self {
        Self { id, generation }
    }

    pub const fn object_id(self) -> ObjectId {
        (self.id, self.generation)
    }
}

impl From<ObjectId> for IndirectReference {
    fn from((id, generation): ObjectId) -> Self {
        Self { id, generation }
    }
}

/// One row of the cross-reference table. Only in-use rows are ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrefEntry {
    pub offset: u64,
    pub generation: u16,
    pub in_use: bool,
}

impl XrefEntry {
    /// `oooooooooo ggggg n` followed by a two-byte terminator, exactly 20 bytes.
    pub fn record(&self) -> [u8; XREF_RECORD_LEN] {
        let mut rec = [b' '; XREF_RECORD_LEN];
        let offset = format!("{:010}", self.offset % MAX_XREF_OFFSET);
        let generation = format!("{:05}", self.generation);
        rec[..10].copy_from_slice(offset.as_bytes());
        rec[11..16].copy_from_slice(generation.as_bytes());
        rec[17] = if self.in_use { b'n' } else { b'f' };
        rec[18] = b' ';
        rec[19] = b'\n';
        rec
    }
}

/// A run of consecutive object ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrefSubsection {
    pub start_id: u32,
    pub entries: Vec<XrefEntry>,
}

impl XrefSubsection {
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// Split ids into runs of consecutive values. Input is sorted and deduplicated first.
pub fn group_consecutive(ids: impl IntoIterator<Item = u32>) -> Vec<Vec<u32>> {
    let mut sorted: Vec<u32> = ids.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.into_iter().fold(Vec::new(), |mut runs: Vec<Vec<u32>>, id| {
        let extends = runs
            .last()
            .and_then(|run| run.last())
            .is_some_and(|&last| last.checked_add(1) == Some(id));
        match runs.last_mut() {
            Some(run) if extends => run.push(id),
            _ => runs.push(vec![id]),
        }
        runs
    })
}

/// Subsections for a set of `(id, entry)` pairs, ascending by id.
pub fn subsections(entries: &BTreeMap<u32, XrefEntry>) -> Vec<XrefSubsection> {
    group_consecutive(entries.keys().copied())
        .into_iter()
        .map(|run| XrefSubsection {
            start_id: run[0],
            entries: run.iter().map(|id| entries[id]).collect(),
        })
        .collect()
}

/// Objects to persist in the new revision, the previous xref offset, and the trailer.
#[derive(Debug, Clone)]
pub struct RevisionUpdate {
    objects: BTreeMap<u32, (IndirectReference, Object)>,
    prev_xref: u64,
    trailer: Dictionary,
}

impl RevisionUpdate {
    /// `trailer` is the source trailer; /Prev is replaced and /XRefStm dropped.
    pub fn new(prev_xref: u64, mut trailer: Dictionary) -> Self {
        trailer.remove(b"XRefStm");
        trailer.set("Prev", prev_xref as i64);
        Self {
            objects: BTreeMap::new(),
            prev_xref,
            trailer,
        }
    }

    /// Stage an updated object. Each object id may appear once.
    pub fn insert(&mut self, reference: IndirectReference, object: Object) -> Result<()> {
        if self.objects.contains_key(&reference.id) {
            return Err(CropError::MalformedDocument(format!(
                "object {} is referenced by more than one page",
                reference.id
            )));
        }
        self.objects.insert(reference.id, (reference, object));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn prev_xref(&self) -> u64 {
        self.prev_xref
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Write the revision to `sink`, whose first byte lands at file offset `base`.
    ///
    /// Returns the offset of the new xref table.
    pub fn write_to<W: Write>(&self, sink: W, base: u64) -> io::Result<u64> {
        let mut out = CountingWriter::new(sink, base);
        let mut offsets = BTreeMap::new();

        for (id, (reference, object)) in &self.objects {
            if out.position() >= MAX_XREF_OFFSET {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "file too large for a classic xref table",
                ));
            }
            offsets.insert(
                *id,
                XrefEntry {
                    offset: out.position(),
                    generation: reference.generation,
                    in_use: true,
                },
            );
            writeln!(out, "{} {} obj", reference.id, reference.generation)?;
            object_bytes::write_object(&mut out, object)?;
            out.write_all(b"\nendobj\n")?;
        }

        let xref_start = out.position();
        out.write_all(XREF_KEYWORD_LINE)?;
        for sub in subsections(&offsets) {
            tracing::debug!(start = sub.start_id, count = sub.count(), "xref subsection");
            writeln!(out, "{} {} ", sub.start_id, sub.count())?;
            for entry in &sub.entries {
                out.write_all(&entry.record())?;
            }
        }

        out.write_all(b"trailer\n")?;
        object_bytes::write_dictionary(&mut out, &self.trailer)?;
        write!(out, "\nstartxref\n{xref_start}\n%%EOF\n")?;
        out.flush()?;
        Ok(xref_start)
    }

    /// Render into memory. `base` is the current length of the target file.
    pub fn render(&self, base: u64) -> io::Result<(Vec<u8>, u64)> {
        let mut buf = Vec::new();
        let xref_start = self.write_to(&mut buf, base)?;
        Ok((buf, xref_start))
    }
}

/// Tracks the absolute file offset of everything written through it.
struct CountingWriter<W> {
    inner: W,
    pos: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W, pos: u64) -> Self {
        Self { inner, pos }
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn grouping_examples() {
        assert_eq!(
            group_consecutive([3, 4, 5, 9, 10, 14]),
            vec![vec![3, 4, 5], vec![9, 10], vec![14]]
        );
        assert_eq!(group_consecutive([7]), vec![vec![7]]);
        assert_eq!(group_consecutive([]), Vec::<Vec<u32>>::new());
        assert_eq!(group_consecutive([14, 3, 5, 4]), vec![vec![3, 4, 5], vec![14]]);
    }

    #[test]
    fn record_layout() {
        let e = XrefEntry { offset: 1234, generation: 2, in_use: true };
        assert_eq!(&e.record(), b"0000001234 00002 n \n");
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut u = RevisionUpdate::new(10, Dictionary::new());
        u.insert(IndirectReference::new(4, 0), Object::Null).unwrap();
        assert!(u.insert(IndirectReference::new(4, 1), Object::Null).is_err());
        assert_eq!(u.len(), 1);
    }

    #[test]
    fn offsets_past_ten_digits_fail() {
        let mut u = RevisionUpdate::new(10, Dictionary::new());
        u.insert(IndirectReference::new(1, 0), Object::Null).unwrap();
        assert!(u.render(MAX_XREF_OFFSET).is_err());
    }

    #[test]
    fn trailer_prev_is_overridden() {
        let trailer = dictionary! {
            "Root" => Object::Reference((1, 0)),
            "Size" => 9,
            "Prev" => 5,
            "XRefStm" => 77,
        };
        let u = RevisionUpdate::new(500, trailer);
        assert_eq!(u.trailer().get(b"Prev").unwrap().as_i64().unwrap(), 500);
        assert!(!u.trailer().has(b"XRefStm"));
        assert!(u.trailer().has(b"Root"));
        assert_eq!(u.prev_xref(), 500);
    }

    #[test]
    fn writes_objects_xref_and_trailer() {
        let mut u = RevisionUpdate::new(
            42,
            dictionary! { "Root" => Object::Reference((1, 0)), "Size" => 6 },
        );
        u.insert(IndirectReference::new(5, 0), Object::Integer(2)).unwrap();
        u.insert(IndirectReference::new(3, 0), Object::Integer(1)).unwrap();

        let base = 100;
        let (bytes, xref_start) = u.render(base).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let expected = "\
3 0 obj\n1\nendobj\n\
5 0 obj\n2\nendobj\n\
xref \n\
3 1 \n\
0000000100 00000 n \n\
5 1 \n\
0000000117 00000 n \n\
trailer\n\
<< /Root 1 0 R /Size 6 /Prev 42 >>\n\
startxref\n134\n%%EOF\n";
        assert_eq!(text, expected);
        assert_eq!(xref_start, 134);
    }

    proptest! {
        #[test]
        fn runs_partition_ids(ids in proptest::collection::btree_set(0u32..200, 0..60)) {
            let runs = group_consecutive(ids.iter().copied());
            let flat: Vec<u32> = runs.iter().flatten().copied().collect();
            prop_assert_eq!(flat, ids.iter().copied().collect::<Vec<_>>());
            for run in &runs {
                prop_assert!(run.windows(2).all(|w| w[1] == w[0] + 1));
            }
            for pair in runs.windows(2) {
                prop_assert!(pair[1][0] > pair[0][pair[0].len() - 1] + 1);
            }
        }

        #[test]
        fn records_are_twenty_bytes(offset in 0u64..10_000_000_000, generation in any::<u16>()) {
            let rec = XrefEntry { offset, generation, in_use: true }.record();
            prop_assert_eq!(rec.len(), XREF_RECORD_LEN);
            prop_assert_eq!(&rec[18..], b" \n");
            let text = std::str::from_utf8(&rec).unwrap();
            prop_assert_eq!(text[..10].parse::<u64>().unwrap(), offset);
            prop_assert_eq!(text[11..16].parse::<u16>().unwrap(), generation);
        }
    }
}
