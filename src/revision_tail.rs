use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{CropError, Result};

/// How far back from the end of the file the `startxref` pointer is searched for.
pub const TAIL_WINDOW: u64 = 1024;

/// Byte offset recorded after the last `startxref` keyword.
///
/// Only the final [`TAIL_WINDOW`] bytes are read: the trailing tokens must be
/// `startxref <offset> %%EOF`. The stream position on entry does not matter.
#[tracing::instrument(level = "debug", skip(stream))]
pub fn locate_tail<R: Read + Seek>(stream: &mut R) -> Result<u64> {
    let len = stream.seek(SeekFrom::End(0))?;
    let start = len.saturating_sub(TAIL_WINDOW);
    stream.seek(SeekFrom::Start(start))?;

    let mut chunk = Vec::with_capacity((len - start) as usize);
    stream.by_ref().take(TAIL_WINDOW).read_to_end(&mut chunk)?;

    let tokens: Vec<&[u8]> = chunk
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let [.., keyword, offset, _eof] = tokens.as_slice() else {
        return Err(CropError::MalformedDocument(
            "file too short to hold a startxref pointer".into(),
        ));
    };
    if *keyword != b"startxref" {
        return Err(CropError::MalformedDocument(
            "no startxref pointer at the end of the file".into(),
        ));
    }

    let offset = std::str::from_utf8(offset)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            CropError::MalformedDocument(format!(
                "startxref value {:?} is not an offset",
                String::from_utf8_lossy(offset)
            ))
        })?;
    tracing::debug!(offset, "found previous xref");
    Ok(offset)
}

/// Refuse tails that point at a cross-reference stream instead of a classic `xref` table.
pub fn ensure_classic_xref<R: Read + Seek>(stream: &mut R, offset: u64) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; 4];
    match stream.read_exact(&mut head) {
        Ok(()) if &head == b"xref" => Ok(()),
        Ok(()) => Err(CropError::MalformedDocument(format!(
            "offset {offset} does not start a classic xref table (cross-reference streams are not supported)"
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            CropError::MalformedDocument(format!("startxref offset {offset} is past the end of the file")),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Keyword line that opens every xref table this crate appends.
pub const XREF_KEYWORD_LINE: &[u8] = b"xref \n";

/// View of `bytes` whose `xref \n` keyword lines lopdf can parse.
///
/// lopdf wants the line end directly after `xref`. The space is swapped for
/// `\r`, which keeps the line a valid EOL and every byte offset unchanged.
/// Only keyword lines that start a line are touched.
pub fn readable_xref_keywords(bytes: &[u8]) -> Cow<'_, [u8]> {
    let spaces: Vec<usize> = bytes
        .windows(XREF_KEYWORD_LINE.len())
        .enumerate()
        .filter(|&(i, w)| {
            w == XREF_KEYWORD_LINE && (i == 0 || matches!(bytes[i - 1], b'\n' | b'\r'))
        })
        .map(|(i, _)| i + 4)
        .collect();
    if spaces.is_empty() {
        return Cow::Borrowed(bytes);
    }
    let mut patched = bytes.to_vec();
    for i in spaces {
        patched[i] = b'\r';
    }
    Cow::Owned(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn with_tail(body_len: usize, tail: &str) -> Vec<u8> {
        let mut v = vec![b'%'; body_len];
        v.extend_from_slice(tail.as_bytes());
        v
    }

    #[test]
    fn reads_offset_from_short_file() {
        let mut c = Cursor::new(with_tail(10, "\nstartxref\n1234\n%%EOF\n"));
        assert_eq!(locate_tail(&mut c).unwrap(), 1234);
    }

    #[test]
    fn reads_offset_from_long_file() {
        let mut c = Cursor::new(with_tail(50_000, "\r\nstartxref\r\n987654\r\n%%EOF"));
        assert_eq!(locate_tail(&mut c).unwrap(), 987654);
    }

    #[test]
    fn last_revision_wins() {
        let data = "xref\nstartxref\n10\n%%EOF\nxref\nstartxref\n99\n%%EOF\n";
        let mut c = Cursor::new(data.as_bytes().to_vec());
        assert_eq!(locate_tail(&mut c).unwrap(), 99);
    }

    #[test]
    fn position_and_prior_reads_do_not_matter() {
        let mut c = Cursor::new(with_tail(4000, "\nstartxref\n321\n%%EOF\n"));
        let first = locate_tail(&mut c).unwrap();
        c.seek(SeekFrom::Start(17)).unwrap();
        let mut scratch = [0u8; 64];
        c.read_exact(&mut scratch).unwrap();
        assert_eq!(locate_tail(&mut c).unwrap(), first);
    }

    #[test]
    fn malformed_tails() {
        for bad in ["", "%%EOF", "startxref\n%%EOF", "trailer\n12\n%%EOF", "startxref\nabc\n%%EOF"] {
            let mut c = Cursor::new(bad.as_bytes().to_vec());
            assert!(
                matches!(locate_tail(&mut c), Err(CropError::MalformedDocument(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn classic_xref_check() {
        let data = b"%PDF-1.4\nxref\n0 1\n5 0 obj\n<< /Type /XRef >>".to_vec();
        let mut c = Cursor::new(data);
        assert!(ensure_classic_xref(&mut c, 9).is_ok());
        assert!(matches!(
            ensure_classic_xref(&mut c, 18),
            Err(CropError::MalformedDocument(_))
        ));
        assert!(matches!(
            ensure_classic_xref(&mut c, 10_000),
            Err(CropError::MalformedDocument(_))
        ));
    }

    #[test]
    fn spaced_xref_keyword_lines_become_crlf() {
        let data = b"endobj\nxref \n3 1 \n0000000009 00000 n \ntrailer\n";
        let view = readable_xref_keywords(data);
        assert_eq!(view.len(), data.len());
        assert_eq!(&view[..13], b"endobj\nxref\r\n");
        assert_eq!(&view[13..], &data[13..]);
    }

    #[test]
    fn other_xref_text_is_left_alone() {
        let data = b"startxref \n12\n%%EOF\nxref\n0 1\n(axref \n)";
        assert!(matches!(readable_xref_keywords(data), Cow::Borrowed(_)));
    }
}
