use std::fmt;

use thiserror::Error;

/// Where the access negotiation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStage {
    /// Reading the document without any decryption.
    Plain,
    /// Decrypting with the empty password.
    EmptyPassword,
    /// Decrypting with the operator-supplied password.
    SuppliedPassword,
}

impl fmt::Display for AccessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessStage::Plain => "plain read",
            AccessStage::EmptyPassword => "empty-password decryption",
            AccessStage::SuppliedPassword => "supplied-password decryption",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CropError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("bounding-box detection failed: {reason}")]
    DetectionFailed { reason: String, diagnostics: String },

    #[error("access denied after {stage}: {cause}{}", password_hint(.password_supplied))]
    AccessDenied {
        stage: AccessStage,
        password_supplied: bool,
        cause: String,
    },

    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("invalid option value: {0}")]
    InvalidOption(String),

    #[error("malformed bounding box on line {line}: {text:?}")]
    MalformedBoundingBox { line: usize, text: String },

    #[error(transparent)]
    Pdf(#[from] lopdf::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn password_hint(supplied: &bool) -> &'static str {
    if *supplied {
        ""
    } else {
        " (the document may need a password; supply one with --password)"
    }
}

pub type Result<T> = std::result::Result<T, CropError>;
