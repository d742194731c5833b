use std::io::{self, Write};

use lopdf::{Dictionary, Object, StringFormat};

/// Serialized form of `obj`, without the `N G obj` wrapper.
pub fn to_bytes(obj: &Object) -> Vec<u8> {
    let mut out = Vec::new();
    // Vec<u8> writes are infallible
    let _ = write_object(&mut out, obj);
    out
}

pub fn write_object<W: Write>(w: &mut W, obj: &Object) -> io::Result<()> {
    match obj {
        Object::Null => w.write_all(b"null"),
        Object::Boolean(b) => w.write_all(if *b { b"true" } else { b"false" }),
        Object::Integer(i) => write!(w, "{i}"),
        Object::Real(r) => {
            if r.is_finite() {
                write!(w, "{r}")
            } else {
                w.write_all(b"0")
            }
        }
        Object::Name(name) => write_name(w, name),
        Object::String(bytes, StringFormat::Literal) => write_literal(w, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => write_hex(w, bytes),
        Object::Array(items) => {
            w.write_all(b"[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.write_all(b" ")?;
                }
                write_object(w, item)?;
            }
            w.write_all(b"]")
        }
        Object::Dictionary(dict) => write_dictionary(w, dict),
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", stream.content.len() as i64);
            write_dictionary(w, &dict)?;
            w.write_all(b"\nstream\n")?;
            w.write_all(&stream.content)?;
            w.write_all(b"\nendstream")
        }
        Object::Reference((id, generation)) => write!(w, "{id} {generation} R"),
    }
}

pub fn write_dictionary<W: Write>(w: &mut W, dict: &Dictionary) -> io::Result<()> {
    w.write_all(b"<<")?;
    for (key, value) in dict.iter() {
        w.write_all(b" ")?;
        write_name(w, key)?;
        w.write_all(b" ")?;
        write_object(w, value)?;
    }
    w.write_all(b" >>")
}

fn is_regular(b: u8) -> bool {
    (0x21..=0x7e).contains(&b) && !b"()<>[]{}/%#".contains(&b)
}

fn write_name<W: Write>(w: &mut W, name: &[u8]) -> io::Result<()> {
    w.write_all(b"/")?;
    for &b in name {
        if is_regular(b) {
            w.write_all(&[b])?;
        } else {
            write!(w, "#{b:02X}")?;
        }
    }
    Ok(())
}

fn write_literal<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(b"(")?;
    for &b in bytes {
        match b {
            b'\\' | b'(' | b')' => w.write_all(&[b'\\', b])?,
            b'\r' => w.write_all(b"\\r")?,
            _ => w.write_all(&[b])?,
        }
    }
    w.write_all(b")")
}

fn write_hex<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(b"<")?;
    for b in bytes {
        write!(w, "{b:02X}")?;
    }
    w.write_all(b">")
}
