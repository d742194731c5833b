use std::collections::{BTreeMap, HashSet};

use lopdf::encryption::{self, PasswordAlgorithm};
use lopdf::xref::XrefEntry;
use lopdf::{Document, EncryptionState, Object, ObjectId, ObjectStream, Reader};

use crate::error::{AccessStage, CropError, Result};
use crate::revision_tail;

/// The two operations access negotiation needs from a loaded document.
pub trait Unlock {
    /// Read enough of the document to prove pages and trailer are usable.
    fn read_metadata(&self) -> std::result::Result<(), String>;
    /// Try to decrypt with `password`.
    fn decrypt_with(&mut self, password: &str) -> std::result::Result<(), String>;
}

/// A loaded document, the bytes it came from, and whether it has been
/// decrypted in this run.
pub struct SourceDocument {
    pub doc: Document,
    bytes: Vec<u8>,
    unlocked: bool,
}

impl SourceDocument {
    pub fn new(doc: Document, bytes: Vec<u8>) -> Self {
        Self {
            doc,
            bytes,
            unlocked: false,
        }
    }

    /// Parse a whole file, including revisions appended by this crate.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let bytes = revision_tail::readable_xref_keywords(&bytes).into_owned();
        let doc = Document::load_mem(&bytes)?;
        Ok(Self::new(doc, bytes))
    }

    /// Objects of an encrypted file, parsed from the raw bytes and decrypted.
    ///
    /// lopdf only does this by itself when the empty password opens the file;
    /// otherwise the load leaves nothing but the /Encrypt dictionary behind.
    fn load_encrypted_objects(&mut self, password: &str) -> lopdf::Result<()> {
        let password = PasswordAlgorithm::try_from(&self.doc)?.sanitize_password(password)?;
        self.doc.authenticate_raw_password(&password)?;
        let state = EncryptionState::decode(&self.doc, &password)?;
        let encrypt_id = self.doc.trailer.get(b"Encrypt").and_then(Object::as_reference)?;

        let reader = Reader {
            buffer: &self.bytes,
            document: std::mem::replace(&mut self.doc, Document::new()),
            encryption_state: None,
            raw_objects: BTreeMap::new(),
        };

        let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
        for (&number, entry) in &reader.document.reference_table.entries {
            let XrefEntry::Normal { generation, .. } = *entry else {
                continue;
            };
            let id = (number, generation);
            if id == encrypt_id {
                continue;
            }
            match reader.get_object(id, &mut HashSet::new()) {
                Ok(mut object) => {
                    if let Err(e) = encryption::decrypt_object(&state, id, &mut object) {
                        tracing::warn!(object = ?id, error = %e, "keeping object as stored");
                    }
                    objects.insert(id, object);
                }
                Err(e) => tracing::warn!(object = ?id, error = %e, "skipping unreadable object"),
            }
        }

        let mut packed = Vec::new();
        for object in objects.values_mut() {
            let Ok(stream) = object.as_stream_mut() else {
                continue;
            };
            if !stream.dict.has_type(b"ObjStm") {
                continue;
            }
            if let Ok(contents) = ObjectStream::new(stream) {
                packed.extend(contents.objects);
            }
        }
        for (id, object) in packed {
            objects.entry(id).or_insert(object);
        }

        let mut doc = reader.document;
        if let Some(dict) = doc.objects.remove(&encrypt_id) {
            objects.insert(encrypt_id, dict);
        }
        doc.objects = objects;
        doc.encryption_state = Some(state);
        self.doc = doc;
        Ok(())
    }
}

impl Unlock for SourceDocument {
    fn read_metadata(&self) -> std::result::Result<(), String> {
        if self.doc.is_encrypted() && !self.unlocked {
            return Err("document is encrypted".into());
        }
        self.doc.catalog().map(|_| ()).map_err(|e| e.to_string())
    }

    fn decrypt_with(&mut self, password: &str) -> std::result::Result<(), String> {
        if self.doc.encryption_state.is_some() {
            // lopdf already decrypted the objects while loading; a second pass
            // would run the cipher over plaintext
            self.doc.authenticate_password(password).map_err(|e| e.to_string())?;
        } else {
            self.load_encrypted_objects(password).map_err(|e| e.to_string())?;
        }
        self.unlocked = true;
        Ok(())
    }
}

/// Which attempt made the document readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Plain,
    EmptyPassword,
    SuppliedPassword,
}

fn attempt<D: Unlock>(doc: &mut D, password: &str) -> std::result::Result<(), String> {
    doc.decrypt_with(password)?;
    doc.read_metadata()
}

/// Plain read, then the empty password, then `password` if one was given.
pub fn negotiate<D: Unlock>(doc: &mut D, password: Option<&str>) -> Result<Access> {
    let Err(plain) = doc.read_metadata() else {
        return Ok(Access::Plain);
    };
    tracing::debug!(cause = %plain, "plain read failed, trying empty password");

    let empty = match attempt(doc, "") {
        Ok(()) => return Ok(Access::EmptyPassword),
        Err(e) => e,
    };

    let Some(password) = password else {
        return Err(CropError::AccessDenied {
            stage: AccessStage::EmptyPassword,
            password_supplied: false,
            cause: empty,
        });
    };
    tracing::debug!(cause = %empty, "empty password rejected, trying supplied password");

    attempt(doc, password)
        .map(|()| Access::SuppliedPassword)
        .map_err(|cause| CropError::AccessDenied {
            stage: AccessStage::SuppliedPassword,
            password_supplied: true,
            cause,
        })
}
